//! Read-only phase backed by an OCI registry reference.
//!
//! The phase resolves its reference on every read and hands the resolved
//! descriptor, and the manifest or index it points at, to the resource.

use std::collections::BTreeMap;
use std::marker::PhantomData;
use std::sync::Arc;

use async_trait::async_trait;
use glu_common::{Annotations, Descriptor, Metadata, State, annotations};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::core::{Phase, Resource, TypedPhase};
use crate::errors::{Error, Result};

pub const KIND: &str = "oci";

pub const MEDIA_TYPE_IMAGE_INDEX: &str = "application/vnd.oci.image.index.v1+json";
pub const MEDIA_TYPE_IMAGE_MANIFEST: &str = "application/vnd.oci.image.manifest.v1+json";

/// Content descriptor as defined by the OCI image spec.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OciDescriptor {
    pub media_type: String,
    pub digest: String,
    pub size: i64,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub urls: Vec<String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub annotations: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub artifact_type: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Manifest {
    pub schema_version: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub media_type: Option<String>,
    pub config: OciDescriptor,
    #[serde(default)]
    pub layers: Vec<OciDescriptor>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub annotations: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Index {
    pub schema_version: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub media_type: Option<String>,
    #[serde(default)]
    pub manifests: Vec<OciDescriptor>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub annotations: BTreeMap<String, String>,
}

/// Resolves a registry reference to a descriptor plus its content.
#[async_trait]
pub trait Resolver: Send + Sync {
    async fn resolve(&self) -> Result<(OciDescriptor, Vec<u8>)>;

    /// Reference being resolved, e.g. `ghcr.io/org/app:latest`.
    fn reference(&self) -> String;
}

/// A resource read from registry content.
///
/// Manifest and index readers fall back to the descriptor reader.
pub trait OciResource: Resource + Default {
    fn read_from_descriptor(&mut self, descriptor: &OciDescriptor) -> Result<()>;

    fn read_from_manifest(&mut self, descriptor: &OciDescriptor, _manifest: &Manifest) -> Result<()> {
        self.read_from_descriptor(descriptor)
    }

    fn read_from_index(&mut self, descriptor: &OciDescriptor, _index: &Index) -> Result<()> {
        self.read_from_descriptor(descriptor)
    }
}

/// Registry-backed phase. Has no write path.
pub struct OciPhase<R> {
    descriptor: Descriptor,
    resolver: Arc<dyn Resolver>,
    _resource: PhantomData<fn() -> R>,
}

impl<R: OciResource> OciPhase<R> {
    pub fn new(pipeline: &str, metadata: Metadata, resolver: Arc<dyn Resolver>) -> Self {
        let metadata = metadata.with_annotation(annotations::OCI_IMAGE_URL, resolver.reference());
        Self {
            descriptor: Descriptor::new(KIND, pipeline, metadata),
            resolver,
            _resource: PhantomData,
        }
    }

    /// Build the resource from resolved registry content.
    pub fn read(descriptor: &OciDescriptor, content: &[u8]) -> Result<R> {
        let mut resource = R::default();
        match descriptor.media_type.as_str() {
            MEDIA_TYPE_IMAGE_INDEX => {
                let index: Index = decode("image index", content)?;
                resource.read_from_index(descriptor, &index)?;
            }
            MEDIA_TYPE_IMAGE_MANIFEST => {
                let manifest: Manifest = decode("image manifest", content)?;
                resource.read_from_manifest(descriptor, &manifest)?;
            }
            _ if content.is_empty() => resource.read_from_descriptor(descriptor)?,
            _ => {
                verify(descriptor, content)?;
                let embedded: OciDescriptor = decode("descriptor", content)?;
                resource.read_from_descriptor(&embedded)?;
            }
        }
        Ok(resource)
    }
}

fn decode<T: serde::de::DeserializeOwned>(what: &'static str, content: &[u8]) -> Result<T> {
    serde_json::from_slice(content).map_err(|source| Error::Decode { what, source })
}

/// Check raw content against the descriptor's size and sha256 digest.
fn verify(descriptor: &OciDescriptor, content: &[u8]) -> Result<()> {
    if descriptor.size >= 0 && descriptor.size as usize != content.len() {
        return Err(Error::Transport(format!(
            "content size mismatch for {}: expected {}, got {}",
            descriptor.digest,
            descriptor.size,
            content.len()
        )));
    }
    if let Some(expected) = descriptor.digest.strip_prefix("sha256:") {
        let actual = hex::encode(Sha256::digest(content));
        if actual != expected {
            return Err(Error::Transport(format!(
                "content digest mismatch: expected sha256:{expected}, got sha256:{actual}"
            )));
        }
    }
    Ok(())
}

#[async_trait]
impl<R: OciResource> Phase for OciPhase<R> {
    fn descriptor(&self) -> Descriptor {
        self.descriptor.clone()
    }

    async fn get(&self) -> Result<Box<dyn Resource>> {
        Ok(Box::new(self.get_resource().await?))
    }

    /// Registries keep no history of their own.
    async fn history(&self) -> Result<Vec<State>> {
        Ok(Vec::new())
    }
}

#[async_trait]
impl<R: OciResource> TypedPhase<R> for OciPhase<R> {
    async fn get_resource(&self) -> Result<R> {
        let (descriptor, content) = self.resolver.resolve().await?;
        tracing::debug!(
            phase = %self.descriptor,
            reference = %self.resolver.reference(),
            media_type = %descriptor.media_type,
            digest = %descriptor.digest,
            "resolved registry reference"
        );
        Self::read(&descriptor, &content)
    }
}

impl<R> std::fmt::Debug for OciPhase<R> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OciPhase")
            .field("descriptor", &self.descriptor)
            .finish_non_exhaustive()
    }
}

/// Ready-made registry resource: the resolved image digest plus the
/// annotations carried by the descriptor, manifest or index.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageDigest {
    pub image_digest: String,
    #[serde(skip)]
    pub annotations: Annotations,
}

impl Resource for ImageDigest {
    fn digest(&self) -> Result<String> {
        Ok(self
            .image_digest
            .split_once(':')
            .map_or(self.image_digest.as_str(), |(_, encoded)| encoded)
            .to_string())
    }

    fn printer_fields(&self) -> Vec<(String, String)> {
        vec![("IMAGE DIGEST".to_string(), self.image_digest.clone())]
    }
}

impl OciResource for ImageDigest {
    fn read_from_descriptor(&mut self, descriptor: &OciDescriptor) -> Result<()> {
        self.image_digest = descriptor.digest.clone();
        self.annotations = descriptor.annotations.clone();
        Ok(())
    }

    fn read_from_manifest(&mut self, descriptor: &OciDescriptor, manifest: &Manifest) -> Result<()> {
        self.image_digest = descriptor.digest.clone();
        self.annotations = manifest.annotations.clone();
        Ok(())
    }

    fn read_from_index(&mut self, descriptor: &OciDescriptor, index: &Index) -> Result<()> {
        self.image_digest = descriptor.digest.clone();
        self.annotations = index.annotations.clone();
        Ok(())
    }
}
