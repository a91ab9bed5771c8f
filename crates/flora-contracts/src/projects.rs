use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::media::Image;
use crate::models::Mode;
use crate::store::{keys, KeyValueStore};

/// A saved before/after pair. Immutable once created; removed only by an
/// explicit delete.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Project {
    pub id: String,
    pub owner_id: String,
    pub instruction: String,
    pub mode: Mode,
    pub before_image: Image,
    pub after_image: Image,
    pub created_at: DateTime<Utc>,
}

pub fn list_projects(store: &KeyValueStore) -> Vec<Project> {
    store.get(keys::PROJECTS, Vec::new())
}

/// Newest first.
pub fn projects_for(store: &KeyValueStore, owner_id: &str) -> Vec<Project> {
    let mut rows = list_projects(store)
        .into_iter()
        .filter(|project| project.owner_id == owner_id)
        .collect::<Vec<Project>>();
    rows.sort_by(|a, b| b.created_at.cmp(&a.created_at));
    rows
}

pub fn find_project(store: &KeyValueStore, id: &str) -> Option<Project> {
    list_projects(store).into_iter().find(|project| project.id == id)
}

pub fn save_project(
    store: &mut KeyValueStore,
    owner_id: &str,
    instruction: &str,
    mode: Mode,
    before_image: Image,
    after_image: Image,
) -> anyhow::Result<Project> {
    let project = Project {
        id: Uuid::new_v4().to_string(),
        owner_id: owner_id.to_string(),
        instruction: instruction.to_string(),
        mode,
        before_image,
        after_image,
        created_at: Utc::now(),
    };
    store.append(keys::PROJECTS, project.clone())?;
    Ok(project)
}

/// Returns whether a project was removed. Only the owner may delete.
pub fn delete_project(store: &mut KeyValueStore, owner_id: &str, id: &str) -> anyhow::Result<bool> {
    let mut rows = list_projects(store);
    let before = rows.len();
    rows.retain(|project| !(project.id == id && project.owner_id == owner_id));
    if rows.len() == before {
        return Ok(false);
    }
    store.set(keys::PROJECTS, &rows)?;
    Ok(true)
}
