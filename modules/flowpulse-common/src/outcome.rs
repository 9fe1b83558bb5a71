/// Result of a two-tier strategy (store → file, live trends → synthesized,
/// similarity → exact grouping). Callers can tell which tier answered.
#[derive(Debug, Clone, PartialEq)]
pub enum Tiered<T> {
    /// The primary tier answered.
    Ok(T),
    /// The fallback tier answered; the reason says why the primary did not.
    Degraded(T, String),
    /// Neither tier could answer.
    Unavailable(String),
}

impl<T> Tiered<T> {
    pub fn value(&self) -> Option<&T> {
        match self {
            Tiered::Ok(v) | Tiered::Degraded(v, _) => Some(v),
            Tiered::Unavailable(_) => None,
        }
    }

    pub fn into_value(self) -> Option<T> {
        match self {
            Tiered::Ok(v) | Tiered::Degraded(v, _) => Some(v),
            Tiered::Unavailable(_) => None,
        }
    }

    pub fn reason(&self) -> Option<&str> {
        match self {
            Tiered::Ok(_) => None,
            Tiered::Degraded(_, r) | Tiered::Unavailable(r) => Some(r),
        }
    }

    pub fn is_degraded(&self) -> bool {
        matches!(self, Tiered::Degraded(..))
    }

    pub fn is_unavailable(&self) -> bool {
        matches!(self, Tiered::Unavailable(_))
    }

    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> Tiered<U> {
        match self {
            Tiered::Ok(v) => Tiered::Ok(f(v)),
            Tiered::Degraded(v, r) => Tiered::Degraded(f(v), r),
            Tiered::Unavailable(r) => Tiered::Unavailable(r),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn map_keeps_tier_and_reason() {
        let t: Tiered<u32> = Tiered::Degraded(2, "fallback".into());
        let mapped = t.map(|v| v * 10);
        assert_eq!(mapped, Tiered::Degraded(20, "fallback".into()));
        assert_eq!(mapped.reason(), Some("fallback"));
    }

    #[test]
    fn unavailable_has_no_value() {
        let t: Tiered<u32> = Tiered::Unavailable("down".into());
        assert!(t.value().is_none());
        assert!(t.is_unavailable());
        assert!(Tiered::Ok(1).reason().is_none());
    }
}
