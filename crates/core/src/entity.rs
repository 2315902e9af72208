//! Entity trait: identity + continuity across state changes.

/// Entity marker + minimal interface.
///
/// Warehouses and packets are entities: two records with the same id are the
/// same thing even after their metadata or status changes.
pub trait Entity {
    /// Strongly-typed entity identifier.
    type Id: Clone + Eq + core::hash::Hash + core::fmt::Debug;

    /// Returns the entity identifier.
    fn id(&self) -> &Self::Id;
}
