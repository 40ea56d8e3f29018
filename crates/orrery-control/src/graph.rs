//! Dependency graph traversal for deployments.
//!
//! Models form a DAG over their dependency edges. Starting a model requires
//! every transitive dependency to be running first, so expansion yields
//! dependencies before dependents. Stopping a model is the reverse concern
//! and is guarded by counting active direct dependents inside the stop
//! transaction ([`crate::store::UnitOfWork::count_active_dependents`]).

use std::collections::HashSet;

use crate::error::{ControlError, ControlResult};
use crate::store::{ModelStore, QueryOptions};
use crate::types::ModelId;

/// Expand a model into the ordered set of models to deploy.
///
/// Depth-first over dependency edges: each model's dependencies appear
/// before it, duplicates are dropped on first visit, and the requested
/// model comes last. A cycle on the current expansion path is a
/// data-integrity fault and fails with
/// [`ControlError::CyclicDependency`] rather than looping.
pub async fn expand_for_deploy(
    store: &dyn ModelStore,
    model_id: &ModelId,
) -> ControlResult<Vec<ModelId>> {
    let mut order = Vec::new();
    let mut visited = HashSet::new();
    let mut on_path = HashSet::new();

    visit(store, model_id, &mut order, &mut visited, &mut on_path).await?;

    Ok(order)
}

/// Recursive DFS step. Boxed because async recursion needs a pinned future.
fn visit<'a>(
    store: &'a dyn ModelStore,
    model_id: &'a ModelId,
    order: &'a mut Vec<ModelId>,
    visited: &'a mut HashSet<ModelId>,
    on_path: &'a mut HashSet<ModelId>,
) -> std::pin::Pin<Box<dyn std::future::Future<Output = ControlResult<()>> + Send + 'a>> {
    Box::pin(async move {
        if on_path.contains(model_id) {
            return Err(ControlError::CyclicDependency(model_id.to_string()));
        }
        if visited.contains(model_id) {
            return Ok(());
        }

        let model = store
            .get_model(model_id, &QueryOptions::bare().with_dependencies())
            .await?
            .ok_or_else(|| ControlError::model_not_found(model_id))?;

        on_path.insert(model_id.clone());
        for dependency in &model.dependencies {
            visit(store, dependency, order, visited, on_path).await?;
        }
        on_path.remove(model_id);

        visited.insert(model_id.clone());
        order.push(model_id.clone());
        Ok(())
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;
    use crate::types::{AccessLevel, ModelRecord, Status, UserId};
    use std::collections::BTreeMap;

    async fn seed(store: &MemoryStore, id: &str, deps: &[&str]) {
        let now = chrono::Utc::now();
        store
            .insert_model(&ModelRecord {
                id: ModelId::new(id),
                name: id.to_owned(),
                model_type: "ndb".to_owned(),
                user_id: UserId::new("u1"),
                parent_id: None,
                access: AccessLevel::Private,
                train_status: Status::Complete,
                deploy_status: Status::NotStarted,
                attributes: BTreeMap::new(),
                dependencies: deps.iter().map(|d| ModelId::new(*d)).collect(),
                owner: None,
                created_at: now,
                updated_at: now,
            })
            .await
            .expect("insert failed");
    }

    #[tokio::test]
    async fn chain_expands_dependencies_first() {
        let store = MemoryStore::new();
        seed(&store, "c", &[]).await;
        seed(&store, "b", &["c"]).await;
        seed(&store, "a", &["b"]).await;

        let order = expand_for_deploy(&store, &ModelId::new("a"))
            .await
            .expect("expansion failed");
        assert_eq!(
            order,
            vec![ModelId::new("c"), ModelId::new("b"), ModelId::new("a")]
        );
    }

    #[tokio::test]
    async fn diamond_deduplicates_shared_dependency() {
        let store = MemoryStore::new();
        seed(&store, "d", &[]).await;
        seed(&store, "b", &["d"]).await;
        seed(&store, "c", &["d"]).await;
        seed(&store, "a", &["b", "c"]).await;

        let order = expand_for_deploy(&store, &ModelId::new("a"))
            .await
            .expect("expansion failed");

        assert_eq!(order.len(), 4);
        assert_eq!(order[0], ModelId::new("d"));
        assert_eq!(order[3], ModelId::new("a"));
        let pos =
            |id: &str| order.iter().position(|m| m.as_str() == id).expect("missing");
        assert!(pos("d") < pos("b"));
        assert!(pos("d") < pos("c"));
    }

    #[tokio::test]
    async fn standalone_model_expands_to_itself() {
        let store = MemoryStore::new();
        seed(&store, "a", &[]).await;

        let order = expand_for_deploy(&store, &ModelId::new("a"))
            .await
            .expect("expansion failed");
        assert_eq!(order, vec![ModelId::new("a")]);
    }

    #[tokio::test]
    async fn cycle_is_a_data_integrity_error() {
        let store = MemoryStore::new();
        // a -> b -> c -> a
        seed(&store, "c", &["a"]).await;
        seed(&store, "b", &["c"]).await;
        seed(&store, "a", &["b"]).await;

        let result = expand_for_deploy(&store, &ModelId::new("a")).await;
        assert!(matches!(result, Err(ControlError::CyclicDependency(_))));
    }

    #[tokio::test]
    async fn missing_dependency_is_not_found() {
        let store = MemoryStore::new();
        seed(&store, "a", &["ghost"]).await;

        let result = expand_for_deploy(&store, &ModelId::new("a")).await;
        assert!(matches!(result, Err(ControlError::NotFound { .. })));
    }
}
