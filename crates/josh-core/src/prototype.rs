// SPDX-License-Identifier: Apache-2.0
//! Entity prototypes: the immutable blueprint entities are built from.
//!
//! Attribute names are assigned stable integer indices at build time; both
//! directions of the mapping are immutable for the prototype's lifetime, and
//! every entity built from a prototype shares them. Handler groups are keyed
//! by `(attribute index, event)`.
use std::collections::BTreeSet;
use std::sync::Arc;

use rustc_hash::FxHashMap;

use crate::handler::{Event, Handler, HandlerFn, HandlerGroup, SelectorFn};

/// The role an entity plays in the world.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum EntityKind {
    /// The single world-level entity (`meta`).
    Simulation,
    /// A geographic grid cell hosting agents.
    Patch,
    /// An organism or other inner entity living on a patch.
    Agent,
}

#[derive(Debug, Default)]
struct AttributeDef {
    name: String,
    groups: FxHashMap<Event, HandlerGroup>,
}

/// Immutable blueprint for entities of one user-declared kind.
#[derive(Debug)]
pub struct EntityPrototype {
    name: String,
    kind: EntityKind,
    attributes: Vec<AttributeDef>,
    index_of: FxHashMap<String, usize>,
}

impl EntityPrototype {
    /// Starts a builder for a prototype of the given name and kind.
    #[must_use]
    pub fn builder(name: &str, kind: EntityKind) -> PrototypeBuilder {
        PrototypeBuilder {
            name: name.to_owned(),
            kind,
            attributes: Vec::new(),
            index_of: FxHashMap::default(),
        }
    }

    /// The user-declared kind name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The entity role.
    #[must_use]
    pub fn kind(&self) -> EntityKind {
        self.kind
    }

    /// True when instances must be built under a parent patch.
    #[must_use]
    pub fn requires_parent(&self) -> bool {
        self.kind == EntityKind::Agent
    }

    /// True when instances must be built with a geographic footprint.
    #[must_use]
    pub fn requires_geometry(&self) -> bool {
        self.kind == EntityKind::Patch
    }

    /// Number of declared attributes.
    #[must_use]
    pub fn attribute_count(&self) -> usize {
        self.attributes.len()
    }

    /// The stable index of `name`, if declared.
    #[must_use]
    pub fn attribute_index(&self, name: &str) -> Option<usize> {
        self.index_of.get(name).copied()
    }

    /// The name at `index`, if in range.
    #[must_use]
    pub fn attribute_name(&self, index: usize) -> Option<&str> {
        self.attributes.get(index).map(|a| a.name.as_str())
    }

    /// The handler group for `(index, event)`, if any handlers were
    /// declared for it.
    #[must_use]
    pub fn group(&self, index: usize, event: Event) -> Option<&HandlerGroup> {
        self.attributes.get(index)?.groups.get(&event)
    }

    /// True when the attribute at `index` declares only unqualified
    /// (constant) handlers.
    #[must_use]
    pub fn is_constant_only(&self, index: usize) -> bool {
        self.attributes.get(index).is_some_and(|attr| {
            !attr.groups.is_empty() && attr.groups.keys().all(|e| *e == Event::Constant)
        })
    }

    /// All events any attribute declares a handler for.
    #[must_use]
    pub fn declared_events(&self) -> BTreeSet<Event> {
        self.attributes
            .iter()
            .flat_map(|attr| attr.groups.keys().copied())
            .collect()
    }
}

/// Fluent builder for [`EntityPrototype`].
///
/// Attributes gain indices in first-mention order, whether mentioned by
/// [`PrototypeBuilder::attribute`] or implicitly by a handler registration.
#[derive(Debug)]
pub struct PrototypeBuilder {
    name: String,
    kind: EntityKind,
    attributes: Vec<AttributeDef>,
    index_of: FxHashMap<String, usize>,
}

impl PrototypeBuilder {
    fn index_for(&mut self, attribute: &str) -> usize {
        if let Some(index) = self.index_of.get(attribute) {
            return *index;
        }
        let index = self.attributes.len();
        self.attributes.push(AttributeDef {
            name: attribute.to_owned(),
            groups: FxHashMap::default(),
        });
        self.index_of.insert(attribute.to_owned(), index);
        index
    }

    /// Declares an attribute without handlers (it can still be written by
    /// other handlers through the scope).
    #[must_use]
    pub fn attribute(mut self, name: &str) -> Self {
        let _ = self.index_for(name);
        self
    }

    /// Registers an unguarded handler for `(attribute, event)`.
    #[must_use]
    pub fn handler(mut self, attribute: &str, event: Event, body: HandlerFn) -> Self {
        let index = self.index_for(attribute);
        self.attributes[index]
            .groups
            .entry(event)
            .or_default()
            .push(Handler::new(body));
        self
    }

    /// Registers a selector-guarded handler for `(attribute, event)`.
    #[must_use]
    pub fn guarded_handler(
        mut self,
        attribute: &str,
        event: Event,
        selector: SelectorFn,
        body: HandlerFn,
    ) -> Self {
        let index = self.index_for(attribute);
        self.attributes[index]
            .groups
            .entry(event)
            .or_default()
            .push(Handler::guarded(selector, body));
        self
    }

    /// Finalizes the prototype. The attribute index maps are immutable from
    /// here on.
    #[must_use]
    pub fn build(self) -> Arc<EntityPrototype> {
        Arc::new(EntityPrototype {
            name: self.name,
            kind: self.kind,
            attributes: self.attributes,
            index_of: self.index_of,
        })
    }
}
