use keptn::resources::{ResourceContent, ResourceRef, ResourceStore};
use std::sync::Arc;

/// Looks a resource up at service, stage and project level and returns the
/// first non-empty hit. Errors at a level count as a miss.
#[derive(Clone)]
pub struct TieredResolver {
    store: Arc<dyn ResourceStore>,
}

impl TieredResolver {
    pub fn new(store: Arc<dyn ResourceStore>) -> Self {
        TieredResolver { store }
    }

    pub fn store(&self) -> &dyn ResourceStore {
        self.store.as_ref()
    }

    pub async fn resolve(&self, resource: &ResourceRef) -> Option<ResourceContent> {
        let scopes = resource.scopes();

        // Unscoped stores answer the same for every level
        let scopes = if self.store.is_scoped() {
            &scopes[..]
        } else {
            &scopes[..1]
        };

        for scope in scopes {
            match self.store.get_resource(scope, &resource.uri).await {
                Ok(Some(found)) if !found.content.is_empty() => {
                    tracing::debug!(uri = %resource.uri, level = scope.level(), "Found resource");
                    return Some(found);
                }
                Ok(_) => {}
                Err(e) => {
                    tracing::debug!(
                        uri = %resource.uri,
                        level = scope.level(),
                        error = %e,
                        "Resource lookup failed"
                    );
                }
            }
        }

        tracing::debug!(
            uri = %resource.uri,
            project = %resource.project,
            stage = %resource.stage,
            service = %resource.service,
            "No resource found"
        );
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use keptn::resources::LocalResourceStore;
    use keptn::testutils::InMemoryResourceStore;

    fn carts(uri: &str) -> ResourceRef {
        ResourceRef::new("sockshop", "staging", "carts", uri)
    }

    #[tokio::test]
    async fn test_service_level_wins() {
        let store = Arc::new(InMemoryResourceStore::new());
        let [service, stage, project] = carts("").scopes();
        store.insert(service, "dynatrace/monaco.conf.yaml", "service");
        store.insert(stage, "dynatrace/monaco.conf.yaml", "stage");
        store.insert(project, "dynatrace/monaco.conf.yaml", "project");

        let resolver = TieredResolver::new(store.clone());
        let found = resolver
            .resolve(&carts("dynatrace/monaco.conf.yaml"))
            .await
            .unwrap();
        assert_eq!(found.content, b"service");
        assert_eq!(store.lookups().len(), 1);
    }

    #[tokio::test]
    async fn test_stage_hit_stops_before_project() {
        let store = Arc::new(InMemoryResourceStore::new());
        let [_, stage, _] = carts("").scopes();
        store.insert(stage, "dynatrace/monaco.conf.yaml", "stage");

        let resolver = TieredResolver::new(store.clone());
        let found = resolver
            .resolve(&carts("dynatrace/monaco.conf.yaml"))
            .await
            .unwrap();
        assert_eq!(found.content, b"stage");

        assert_eq!(
            store.lookups(),
            vec![
                ("service", "dynatrace/monaco.conf.yaml".to_string()),
                ("stage", "dynatrace/monaco.conf.yaml".to_string()),
            ]
        );
    }

    #[tokio::test]
    async fn test_falls_through_errors_and_empty_content() {
        let store = Arc::new(InMemoryResourceStore::new());
        let [service, stage, project] = carts("").scopes();
        store.insert(service, "dynatrace/monaco.zip", "");
        store.insert(stage, "dynatrace/monaco.zip", "stage");
        store.insert(project, "dynatrace/monaco.zip", "project");
        store.fail_level("stage");

        let resolver = TieredResolver::new(store.clone());
        let found = resolver.resolve(&carts("dynatrace/monaco.zip")).await.unwrap();
        assert_eq!(found.content, b"project");

        let levels: Vec<&str> = store.lookups().iter().map(|(level, _)| *level).collect();
        assert_eq!(levels, vec!["service", "stage", "project"]);
    }

    #[tokio::test]
    async fn test_all_levels_missing() {
        let store = Arc::new(InMemoryResourceStore::new());
        store.fail_level("project");

        let resolver = TieredResolver::new(store);
        assert_eq!(resolver.resolve(&carts("dynatrace/monaco.zip")).await, None);
    }

    #[tokio::test]
    async fn test_unscoped_store_reads_once() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("dynatrace")).unwrap();
        std::fs::write(
            dir.path().join("dynatrace/_monaco.conf.yaml"),
            "projects: [infra]",
        )
        .unwrap();

        let resolver = TieredResolver::new(Arc::new(LocalResourceStore::new(dir.path())));
        let found = resolver
            .resolve(&carts("dynatrace/_monaco.conf.yaml"))
            .await
            .unwrap();
        assert_eq!(found.content, b"projects: [infra]");

        assert_eq!(resolver.resolve(&carts("dynatrace/monaco.zip")).await, None);
    }
}
