//! Model codec
//!
//! Owns the option index of one cluster model type and turns defaults or a
//! fetched remote object into a rendered manifest.

use crate::domain::ports::{ManifestRenderer, ResourceKind};
use crate::error::{Error, Result};
use crate::model::{ConfigModel, Manifest};
use crate::options::{self, OptionIndex};
use std::marker::PhantomData;
use tracing::debug;

pub struct ModelCodec<M> {
    kind: ResourceKind,
    index: OptionIndex,
    _model: PhantomData<fn() -> M>,
}

impl<M: ConfigModel> ModelCodec<M> {
    /// Build the codec, indexing the model type once
    pub fn new(kind: ResourceKind) -> Result<Self> {
        let index = OptionIndex::build::<M>()?;
        debug!("Indexed {} options for {}", index.len(), kind);
        Ok(Self {
            kind,
            index,
            _model: PhantomData,
        })
    }

    pub fn kind(&self) -> &ResourceKind {
        &self.kind
    }

    pub fn index(&self) -> &OptionIndex {
        &self.index
    }

    /// Defaults for `name` with each override layer applied in order
    pub fn create(&self, name: &str, layers: &[&str]) -> Result<String> {
        let mut spec = M::defaults(name);
        for layer in layers {
            options::apply(&mut spec, &self.index, layer)?;
        }
        debug!("Rendering new {}/{}: {}", self.kind, name, spec.summary());
        Manifest::new(&self.kind, name, spec).render()
    }

    /// Current remote object with each override layer applied in order
    pub fn edit(&self, current: &[u8], layers: &[&str]) -> Result<String> {
        let mut manifest: Manifest<M> = Manifest::from_remote(current)?;
        if manifest.kind != self.kind.kind {
            return Err(Error::Manifest(format!(
                "expected a {} but the remote object is a {}",
                self.kind.kind, manifest.kind
            )));
        }
        for layer in layers {
            options::apply(&mut manifest.spec, &self.index, layer)?;
        }
        debug!(
            "Rendering edited {}/{}: {}",
            self.kind,
            manifest.metadata.name,
            manifest.spec.summary()
        );
        manifest.render()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::PxcClusterSpec;

    fn codec() -> ModelCodec<PxcClusterSpec> {
        ModelCodec::new(ResourceKind::new(
            "pxc.percona.com",
            "v1",
            "PerconaXtraDBCluster",
            "perconaxtradbclusters",
        ))
        .unwrap()
    }

    fn decode(yaml: &str) -> Manifest<PxcClusterSpec> {
        serde_yaml::from_str(yaml).unwrap()
    }

    #[test]
    fn test_create_applies_layers_in_order() {
        let yaml = codec()
            .create("db1", &["pxc.size=1,pxc.image=a", "pxc.image=b"])
            .unwrap();
        let manifest = decode(&yaml);

        assert_eq!(manifest.metadata.name, "db1");
        assert_eq!(manifest.spec.pxc.size, 1);
        assert_eq!(manifest.spec.pxc.image, "b");
        assert_eq!(manifest.spec.secrets_name, "db1-secrets");
    }

    #[test]
    fn test_edit_preserves_unspecified_fields() {
        let codec = codec();
        let mut spec = PxcClusterSpec::defaults("db1");
        spec.proxysql.size = 2;
        spec.pxc.node_selector.insert("disk".into(), "ssd".into());
        let remote = serde_json::json!({
            "apiVersion": "pxc.percona.com/v1",
            "kind": "PerconaXtraDBCluster",
            "metadata": {"name": "db1", "resourceVersion": "77"},
            "spec": spec,
            "status": {"state": "ready"},
        });

        let yaml = codec
            .edit(&serde_json::to_vec(&remote).unwrap(), &["pxc.size=5"])
            .unwrap();
        let manifest = decode(&yaml);

        assert_eq!(manifest.spec.pxc.size, 5);
        assert_eq!(manifest.spec.proxysql.size, 2);
        assert_eq!(manifest.spec.pxc.node_selector["disk"], "ssd");
    }

    #[test]
    fn test_edit_rejects_other_kinds() {
        let remote = serde_json::json!({
            "apiVersion": "psmdb.percona.com/v1",
            "kind": "PerconaServerMongoDB",
            "metadata": {"name": "db1"},
            "spec": {},
        });
        let err = codec()
            .edit(&serde_json::to_vec(&remote).unwrap(), &[])
            .unwrap_err();
        assert!(matches!(err, Error::Manifest(_)));
    }
}
