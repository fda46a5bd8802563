//! Entity trait: a record with a stable identity.

/// Anything persisted by a storage collaborator under its own id.
pub trait Entity {
    /// Strongly-typed entity identifier.
    type Id: Clone + Eq + core::hash::Hash + core::fmt::Debug;

    fn id(&self) -> &Self::Id;
}
