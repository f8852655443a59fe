//! Catalog model for Prism.
//!
//! Builds and caches the tree of databases, schemas, relations, and columns
//! reported by a connection. Nodes live in an arena addressed by stable
//! `NodeId`s; parent/child links are id relations, not owning references.
//! Children are fetched lazily through the introspection connection and at
//! most once per node lifetime: re-expanding a collapsed node reuses the
//! cached children without another adapter call.

use std::collections::HashSet;
use std::fmt;

use tracing::warn;

use crate::adapter::{Adapter, CatalogEntry, CatalogKind, Connection};
use crate::error::{PrismError, Result};

/// Stable handle to a node in the catalog arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct NodeId(usize);

impl NodeId {
    /// The node's position in the arena.
    pub fn index(&self) -> usize {
        self.0
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// One entity in the catalog tree.
#[derive(Debug, Clone)]
pub struct CatalogNode {
    entry: CatalogEntry,
    /// Display name.
    pub label: String,
    /// Short display annotation (relation kind, column type).
    pub type_label: Option<String>,
    /// Fully escaped, dot-joined path uniquely naming this entity.
    pub qualified_identifier: String,
    /// Minimal identifier fragment to insert at the cursor.
    pub query_name: String,
    parent: Option<NodeId>,
    /// `None` until children have been fetched; `Some` afterwards, even
    /// when the fetch came back empty.
    children: Option<Vec<NodeId>>,
    /// Toggled by the consumer; expansion triggers the child fetch once.
    pub is_expanded: bool,
}

impl CatalogNode {
    /// What kind of entity this node is.
    pub fn kind(&self) -> CatalogKind {
        self.entry.kind
    }

    /// The parent node, if this is not a root.
    pub fn parent(&self) -> Option<NodeId> {
        self.parent
    }

    /// Cached children, or `None` when they have never been fetched.
    pub fn children(&self) -> Option<&[NodeId]> {
        self.children.as_deref()
    }

    /// Whether this node's kind permits children at all.
    pub fn can_expand(&self) -> bool {
        self.entry.kind.can_have_children()
    }
}

/// Arena-backed catalog tree for one connection.
#[derive(Debug, Default)]
pub struct CatalogTree {
    nodes: Vec<CatalogNode>,
    roots: Vec<NodeId>,
}

impl CatalogTree {
    /// Builds the tree's top level from the connection's visible databases.
    ///
    /// Roots are the databases themselves; they start collapsed and their
    /// children are fetched on first expansion.
    pub async fn load(connection: &dyn Connection, adapter: &dyn Adapter) -> Result<Self> {
        let mut tree = Self::default();
        for entry in connection.catalog().await? {
            let id = tree.insert(entry, None, adapter);
            tree.roots.push(id);
        }
        Ok(tree)
    }

    /// Top-level database nodes.
    pub fn roots(&self) -> &[NodeId] {
        &self.roots
    }

    /// Looks up a node by id.
    pub fn node(&self, id: NodeId) -> Option<&CatalogNode> {
        self.nodes.get(id.0)
    }

    /// Total number of nodes currently materialized.
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// Whether the arena holds no nodes.
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Expands a node, fetching its children if they were never fetched.
    ///
    /// Idempotent and memoized: an already-fetched node (including one whose
    /// fetch returned no children) is marked expanded without touching the
    /// adapter again. Expanding a leaf kind fails with an introspection
    /// error and leaves the node collapsed and its parent untouched.
    pub async fn expand(
        &mut self,
        id: NodeId,
        connection: &dyn Connection,
        adapter: &dyn Adapter,
    ) -> Result<Vec<NodeId>> {
        let node = self
            .nodes
            .get(id.0)
            .ok_or_else(|| PrismError::internal(format!("unknown catalog node {id}")))?;

        if !node.can_expand() {
            return Err(PrismError::introspection(format!(
                "'{}' cannot be expanded",
                node.label
            )));
        }

        if let Some(children) = node.children.clone() {
            self.nodes[id.0].is_expanded = true;
            return Ok(children);
        }

        let entry = node.entry.clone();
        let child_entries = connection.expand(&entry).await?;

        let children: Vec<NodeId> = child_entries
            .into_iter()
            .map(|child| self.insert(child, Some(id), adapter))
            .collect();

        let node = &mut self.nodes[id.0];
        node.children = Some(children.clone());
        node.is_expanded = true;
        Ok(children)
    }

    /// Collapses a node. Cached children are kept for the next expansion.
    pub fn collapse(&mut self, id: NodeId) {
        if let Some(node) = self.nodes.get_mut(id.0) {
            node.is_expanded = false;
        }
    }

    /// Rebuilds the tree from the backend, preserving which nodes were
    /// expanded (keyed by qualified identifier) across the refresh.
    pub async fn refresh(
        &mut self,
        connection: &dyn Connection,
        adapter: &dyn Adapter,
    ) -> Result<()> {
        let expanded: HashSet<String> = self
            .nodes
            .iter()
            .filter(|node| node.is_expanded)
            .map(|node| node.qualified_identifier.clone())
            .collect();

        *self = Self::load(connection, adapter).await?;

        let mut pending: Vec<NodeId> = self.roots.clone();
        while let Some(id) = pending.pop() {
            let should_expand = match self.node(id) {
                Some(node) => expanded.contains(&node.qualified_identifier) && node.can_expand(),
                None => false,
            };
            if !should_expand {
                continue;
            }
            match self.expand(id, connection, adapter).await {
                Ok(children) => pending.extend(children),
                // The entity may have been dropped since the last refresh;
                // leave it collapsed rather than failing the whole rebuild.
                Err(e) => warn!("Skipping re-expansion during refresh: {e}"),
            }
        }

        Ok(())
    }

    fn insert(
        &mut self,
        entry: CatalogEntry,
        parent: Option<NodeId>,
        adapter: &dyn Adapter,
    ) -> NodeId {
        let qualified_identifier = qualified_identifier(&entry, adapter);
        let query_name = query_name(&entry, &qualified_identifier, adapter);

        let id = NodeId(self.nodes.len());
        self.nodes.push(CatalogNode {
            label: entry.name.clone(),
            type_label: entry.type_label.clone(),
            qualified_identifier,
            query_name,
            parent,
            children: None,
            is_expanded: false,
            entry,
        });
        id
    }
}

/// Joins the entry's ancestry into a fully quoted dotted path.
fn qualified_identifier(entry: &CatalogEntry, adapter: &dyn Adapter) -> String {
    entry
        .path
        .iter()
        .map(|segment| adapter.quote_identifier(segment))
        .collect::<Vec<_>>()
        .join(".")
}

/// Derives the fragment inserted into the editor for this entry.
///
/// Databases and schemas are top-level references and insert their full
/// qualified path; relations and columns insert just their quoted name,
/// since catalog navigation already scoped the context.
fn query_name(entry: &CatalogEntry, qualified_identifier: &str, adapter: &dyn Adapter) -> String {
    match entry.kind {
        CatalogKind::Database | CatalogKind::Schema => qualified_identifier.to_string(),
        CatalogKind::Relation | CatalogKind::Column => adapter.quote_identifier(&entry.name),
    }
}
