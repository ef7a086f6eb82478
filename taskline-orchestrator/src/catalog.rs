//! Typed catalog lookups
//!
//! Wraps the raw document catalog with one accessor per record kind.

use std::sync::Arc;

use serde::de::DeserializeOwned;
use taskline_core::domain::catalog::{
    BasicImage, Build, BuildTemplate, CatalogKind, Cluster, DbInstance, Environment,
    ObjectStorage, Registry, Scanning, ScanningTemplate, ServiceInfo, SonarIntegration,
};

use crate::repository::{Catalog, StoreResult, from_document};

#[derive(Clone)]
pub struct CatalogReader {
    inner: Arc<dyn Catalog>,
}

impl CatalogReader {
    pub fn new(inner: Arc<dyn Catalog>) -> Self {
        Self { inner }
    }

    async fn get<T: DeserializeOwned>(&self, kind: CatalogKind, key: &str) -> StoreResult<Option<T>> {
        match self.inner.get_record(kind, key).await? {
            Some(document) => Ok(Some(from_document(document)?)),
            None => Ok(None),
        }
    }

    async fn list<T: DeserializeOwned>(&self, kind: CatalogKind) -> StoreResult<Vec<T>> {
        self.inner
            .list_records(kind)
            .await?
            .into_iter()
            .map(from_document)
            .collect()
    }

    pub async fn build(&self, name: &str) -> StoreResult<Option<Build>> {
        self.get(CatalogKind::Build, name).await
    }

    pub async fn build_template(&self, id: &str) -> StoreResult<Option<BuildTemplate>> {
        self.get(CatalogKind::BuildTemplate, id).await
    }

    pub async fn scanning(&self, name: &str) -> StoreResult<Option<Scanning>> {
        self.get(CatalogKind::Scanning, name).await
    }

    pub async fn scanning_template(&self, id: &str) -> StoreResult<Option<ScanningTemplate>> {
        self.get(CatalogKind::ScanningTemplate, id).await
    }

    pub async fn registry(&self, id: &str) -> StoreResult<Option<Registry>> {
        self.get(CatalogKind::Registry, id).await
    }

    pub async fn registries(&self) -> StoreResult<Vec<Registry>> {
        self.list(CatalogKind::Registry).await
    }

    /// Registry by ID, falling back to the default one when the ID is empty
    pub async fn registry_or_default(&self, id: &str) -> StoreResult<Option<Registry>> {
        if !id.is_empty() {
            return self.registry(id).await;
        }
        Ok(self.registries().await?.into_iter().find(|r| r.is_default))
    }

    pub async fn service(&self, name: &str) -> StoreResult<Option<ServiceInfo>> {
        self.get(CatalogKind::Service, name).await
    }

    pub async fn services(&self) -> StoreResult<Vec<ServiceInfo>> {
        self.list(CatalogKind::Service).await
    }

    pub async fn environment(&self, name: &str) -> StoreResult<Option<Environment>> {
        self.get(CatalogKind::Environment, name).await
    }

    pub async fn db_instance(&self, id: &str) -> StoreResult<Option<DbInstance>> {
        self.get(CatalogKind::DbInstance, id).await
    }

    pub async fn object_storage(&self, id: &str) -> StoreResult<Option<ObjectStorage>> {
        self.get(CatalogKind::ObjectStorage, id).await
    }

    pub async fn default_object_storage(&self) -> StoreResult<Option<ObjectStorage>> {
        let storages: Vec<ObjectStorage> = self.list(CatalogKind::ObjectStorage).await?;
        Ok(storages.into_iter().find(|s| s.is_default))
    }

    pub async fn cluster(&self, id: &str) -> StoreResult<Option<Cluster>> {
        self.get(CatalogKind::Cluster, id).await
    }

    pub async fn basic_image(&self, id: &str) -> StoreResult<Option<BasicImage>> {
        self.get(CatalogKind::BasicImage, id).await
    }

    pub async fn sonar(&self, id: &str) -> StoreResult<Option<SonarIntegration>> {
        self.get(CatalogKind::Sonar, id).await
    }
}
