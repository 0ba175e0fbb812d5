//! Creator similarity graph.
//!
//! Every unordered pair of entities is compared once; an edge is kept when
//! the cosine similarity of their embeddings is strictly above the threshold.
//! The scan is quadratic, which is fine for the few hundred creators this is
//! built for.

use std::collections::{BTreeMap, HashSet};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::record::{EmbeddingRecord, Metadata, MetadataValue};
use crate::similarity::cosine_similarity;

/// Configuration for graph builds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GraphConfig {
    /// Default edge threshold.
    pub threshold: f64,

    /// Metadata field used to group nodes into clusters.
    pub track_field: String,

    /// Cluster name for nodes without a track.
    pub default_track: String,

    /// Metadata field holding the follower count.
    pub followers_field: String,

    /// Metadata field holding the interaction count.
    pub interaction_field: String,

    /// Weight of followers in the influence score.
    pub followers_weight: f64,

    /// Weight of interactions in the influence score.
    pub interaction_weight: f64,
}

impl Default for GraphConfig {
    fn default() -> Self {
        Self {
            threshold: 0.7,
            track_field: "primary_track".to_string(),
            default_track: "other".to_string(),
            followers_field: "followers".to_string(),
            interaction_field: "interaction".to_string(),
            followers_weight: 0.6,
            interaction_weight: 0.4,
        }
    }
}

/// A node in the similarity graph.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GraphNode {
    /// Entity id.
    pub id: String,

    /// Whether the entity had a non-empty embedding.
    pub has_embedding: bool,

    /// Cluster the node belongs to.
    pub track: String,

    /// Weighted follower/interaction score, when both inputs are present.
    pub influence: Option<i64>,

    /// Entity metadata.
    pub metadata: Metadata,
}

/// An undirected, weighted edge. Stored once per pair.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GraphEdge {
    /// The entity that came first in the input.
    pub source: String,

    /// The entity that came second in the input.
    pub target: String,

    /// Cosine similarity of the two embeddings.
    pub weight: f64,
}

/// Result of a graph build.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Graph {
    /// Nodes in input order.
    pub nodes: Vec<GraphNode>,

    /// Edges above the threshold.
    pub edges: Vec<GraphEdge>,

    /// Node ids grouped by track.
    pub clusters: BTreeMap<String, Vec<String>>,

    /// Threshold the edges were built with.
    pub threshold: f64,

    /// When the build finished.
    pub generated_at: DateTime<Utc>,
}

impl Graph {
    /// Find the edge between two nodes, in either direction.
    pub fn edge(&self, a: &str, b: &str) -> Option<&GraphEdge> {
        self.edges.iter().find(|e| {
            (e.source == a && e.target == b) || (e.source == b && e.target == a)
        })
    }

    /// Ids of the nodes connected to `id`.
    pub fn neighbors(&self, id: &str) -> Vec<&str> {
        self.edges
            .iter()
            .filter_map(|e| {
                if e.source == id {
                    Some(e.target.as_str())
                } else if e.target == id {
                    Some(e.source.as_str())
                } else {
                    None
                }
            })
            .collect()
    }
}

/// Builds similarity graphs over entity embeddings.
#[derive(Debug, Clone, Default)]
pub struct SimilarityGraphBuilder {
    config: GraphConfig,
}

impl SimilarityGraphBuilder {
    /// Create a builder.
    pub fn new(config: GraphConfig) -> Self {
        Self { config }
    }

    /// Get the configuration.
    pub fn config(&self) -> &GraphConfig {
        &self.config
    }

    /// Build the graph over `entities` with the given threshold.
    ///
    /// Vectors need not be normalized. Pairs with different dimensions are
    /// never connected; repeated ids keep their first occurrence.
    pub fn build(&self, entities: &[EmbeddingRecord], threshold: f64) -> Graph {
        let mut seen = HashSet::with_capacity(entities.len());
        let entities: Vec<&EmbeddingRecord> = entities
            .iter()
            .filter(|e| {
                let first = seen.insert(e.id.as_str());
                if !first {
                    warn!("Ignoring duplicate graph entity {}", e.id);
                }
                first
            })
            .collect();

        let nodes: Vec<GraphNode> = entities.iter().map(|e| self.node(e)).collect();

        let mut edges = Vec::new();
        for (i, a) in entities.iter().enumerate() {
            if a.vector.is_empty() {
                continue;
            }
            for b in entities.iter().skip(i + 1) {
                if b.vector.is_empty() {
                    continue;
                }
                match cosine_similarity(&a.vector, &b.vector) {
                    Ok(similarity) if similarity > threshold => edges.push(GraphEdge {
                        source: a.id.clone(),
                        target: b.id.clone(),
                        weight: similarity,
                    }),
                    Ok(_) => {}
                    Err(err) => debug!("No edge {} - {}: {err}", a.id, b.id),
                }
            }
        }

        let mut clusters: BTreeMap<String, Vec<String>> = BTreeMap::new();
        for node in &nodes {
            clusters
                .entry(node.track.clone())
                .or_default()
                .push(node.id.clone());
        }

        info!(
            "Built similarity graph: {} nodes, {} edges (threshold {threshold})",
            nodes.len(),
            edges.len()
        );

        Graph {
            nodes,
            edges,
            clusters,
            threshold,
            generated_at: Utc::now(),
        }
    }

    fn node(&self, entity: &EmbeddingRecord) -> GraphNode {
        let track = entity
            .metadata
            .get(&self.config.track_field)
            .and_then(MetadataValue::as_str)
            .filter(|t| !t.is_empty())
            .unwrap_or(&self.config.default_track)
            .to_string();

        let influence = match (
            entity.number(&self.config.followers_field),
            entity.number(&self.config.interaction_field),
        ) {
            (Some(followers), Some(interaction)) => Some(
                (self.config.followers_weight * followers
                    + self.config.interaction_weight * interaction)
                    .round() as i64,
            ),
            _ => None,
        };

        GraphNode {
            id: entity.id.clone(),
            has_embedding: !entity.vector.is_empty(),
            track,
            influence,
            metadata: entity.metadata.clone(),
        }
    }
}
