//! The pipeline category tree: group → pipeline → sub-pipeline, depth fixed
//! at two. Loaded once from config; lookups hit a flat index built at load.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use mapops_common::{MapOpsError, PipelineCategory, PipelineGroup};

/// One taxonomy entry as it appears in the config file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CategoryConfig {
    pub id: String,
    pub label: String,
    #[serde(default)]
    pub color: String,
    /// Group code (`foundation` | `location` | `last_mile` | `other`).
    /// Absent means `Unclassified`. Unknown codes are rejected at load.
    #[serde(default)]
    pub group: Option<String>,
    /// Parent pipeline id. Present on sub-pipelines only.
    #[serde(default)]
    pub parent: Option<String>,
}

#[derive(Debug, Default)]
pub struct PipelineTaxonomy {
    categories: HashMap<String, PipelineCategory>,
    /// Insertion order of loaded ids, for stable group iteration.
    order: Vec<String>,
}

impl PipelineTaxonomy {
    /// Load the taxonomy with per-entry validation. Invalid entries are
    /// rejected and reported; valid ones still load (partial load, never
    /// all-or-nothing at the taxonomy level).
    pub fn load(configs: Vec<CategoryConfig>) -> (Self, Vec<(String, MapOpsError)>) {
        let mut taxonomy = Self::default();
        let mut rejects = Vec::new();

        // First pass: pipelines (no parent).
        let (roots, subs): (Vec<_>, Vec<_>) =
            configs.into_iter().partition(|c| c.parent.is_none());

        for cfg in roots {
            match parse_group(cfg.group.as_deref()) {
                Ok(group) => taxonomy.insert(PipelineCategory {
                    id: cfg.id.clone(),
                    label: cfg.label,
                    color: cfg.color,
                    group,
                    parent: None,
                }),
                Err(e) => rejects.push((cfg.id, e)),
            }
        }

        // Second pass: sub-pipelines, validated against the loaded roots.
        for cfg in subs {
            let Some(parent_id) = cfg.parent.clone() else {
                continue;
            };
            let parent = match taxonomy.categories.get(&parent_id) {
                Some(p) => p,
                None => {
                    rejects.push((
                        cfg.id,
                        MapOpsError::Validation(format!(
                            "parent pipeline '{parent_id}' does not exist"
                        )),
                    ));
                    continue;
                }
            };
            if parent.parent.is_some() {
                rejects.push((
                    cfg.id,
                    MapOpsError::Validation(format!(
                        "parent '{parent_id}' is itself a sub-pipeline; depth beyond 2 is not supported"
                    )),
                ));
                continue;
            }
            let group = parent.group;
            if let Some(code) = cfg.group.as_deref() {
                match PipelineGroup::parse_code(code) {
                    Ok(g) if g == group => {}
                    Ok(_) => {
                        rejects.push((
                            cfg.id,
                            MapOpsError::Validation(format!(
                                "group '{code}' conflicts with parent '{parent_id}' group '{group}'"
                            )),
                        ));
                        continue;
                    }
                    Err(e) => {
                        rejects.push((cfg.id, e));
                        continue;
                    }
                }
            }
            taxonomy.insert(PipelineCategory {
                id: cfg.id.clone(),
                label: cfg.label,
                color: cfg.color,
                group,
                parent: Some(parent_id),
            });
        }

        (taxonomy, rejects)
    }

    fn insert(&mut self, category: PipelineCategory) {
        self.order.push(category.id.clone());
        self.categories.insert(category.id.clone(), category);
    }

    /// O(1) lookup by id.
    pub fn resolve(&self, id: &str) -> Result<&PipelineCategory, MapOpsError> {
        self.categories
            .get(id)
            .ok_or_else(|| MapOpsError::NotFound(format!("pipeline category '{id}'")))
    }

    /// Groups in display order, each with its pipelines in insertion order.
    /// Empty groups are omitted.
    pub fn groups_in_order(&self) -> Vec<(PipelineGroup, Vec<&PipelineCategory>)> {
        PipelineGroup::ALL
            .iter()
            .filter_map(|group| {
                let pipelines: Vec<&PipelineCategory> = self
                    .order
                    .iter()
                    .filter_map(|id| self.categories.get(id))
                    .filter(|c| c.group == *group && c.parent.is_none())
                    .collect();
                (!pipelines.is_empty()).then_some((*group, pipelines))
            })
            .collect()
    }

    /// Sub-pipelines of one pipeline, in insertion order.
    pub fn children(&self, id: &str) -> Vec<&PipelineCategory> {
        self.order
            .iter()
            .filter_map(|cid| self.categories.get(cid))
            .filter(|c| c.parent.as_deref() == Some(id))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.categories.len()
    }

    pub fn is_empty(&self) -> bool {
        self.categories.is_empty()
    }
}

fn parse_group(code: Option<&str>) -> Result<PipelineGroup, MapOpsError> {
    match code {
        Some(c) => PipelineGroup::parse_code(c),
        None => Ok(PipelineGroup::Unclassified),
    }
}
