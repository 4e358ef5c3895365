//! Codec for [`ManifestBundle`].
//!
//! Spec events carry labels, annotations and the bundle spec as a JSON
//! payload, plus the `resourcemeta` attribute naming the bundle. Status
//! events carry only the status. A bundle with a deletion timestamp always
//! encodes to a deletion payload with identity attributes and nothing else.

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::bundle::{bundle_data_type, BundleSpec, BundleStatus, ManifestBundle};
use crate::codec::{deletion_envelope, deletion_time, identity_attributes, Codec};
use crate::envelope::{keys, Envelope, Payload};
use crate::error::{CoreError, Result};
use crate::event_type::{DataType, EventType, SubResource};
use crate::meta::{ObjectMeta, ResourceMeta};
use crate::resource::ResourceObject;

#[derive(Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SpecPayload {
    #[serde(default)]
    generation: i64,
    #[serde(default)]
    labels: BTreeMap<String, String>,
    #[serde(default)]
    annotations: BTreeMap<String, String>,
    spec: BundleSpec,
}

#[derive(Serialize, Deserialize)]
struct StatusPayload {
    status: Option<BundleStatus>,
}

/// Encodes bundles on both the spec and status channels.
pub struct ManifestBundleCodec {
    data_type: DataType,
}

impl ManifestBundleCodec {
    /// A codec for the default bundle data type.
    pub fn new() -> Self {
        Self::with_data_type(bundle_data_type())
    }

    /// A codec publishing bundles under another data type.
    pub fn with_data_type(data_type: DataType) -> Self {
        Self { data_type }
    }

    fn check(&self, data_type: &DataType) -> Result<()> {
        if *data_type != self.data_type {
            return Err(CoreError::UnsupportedDataType(data_type.clone()));
        }
        Ok(())
    }

    fn resource_meta(&self, bundle: &ManifestBundle) -> ResourceMeta {
        ResourceMeta {
            group: self.data_type.group.clone(),
            version: self.data_type.version.clone(),
            resource: self.data_type.resource.clone(),
            namespace: bundle.metadata.namespace.clone(),
            name: bundle.metadata.name.clone(),
            ordinal: bundle.ordinal,
        }
    }
}

impl Default for ManifestBundleCodec {
    fn default() -> Self {
        Self::new()
    }
}

impl Codec<ManifestBundle> for ManifestBundleCodec {
    fn data_type(&self) -> &DataType {
        &self.data_type
    }

    fn encode(
        &self,
        source: &str,
        event_type: &EventType,
        bundle: &ManifestBundle,
    ) -> Result<Envelope> {
        self.check(&event_type.data_type)?;
        let version = bundle.version_number()?;

        if let Some(deleted_at) = bundle.deletion_timestamp() {
            return deletion_envelope(
                event_type,
                source,
                bundle.uid(),
                version,
                bundle.cluster_name(),
                deleted_at,
            );
        }

        let mut envelope = Envelope::new(event_type, source)?;
        identity_attributes(&mut envelope, bundle.uid(), version, bundle.cluster_name());
        envelope.set_attribute(
            keys::RESOURCE_META,
            self.resource_meta(bundle).to_attribute()?,
        );

        let body = match event_type.sub_resource {
            SubResource::Spec => serde_json::to_vec(&SpecPayload {
                generation: bundle.metadata.generation,
                labels: bundle.metadata.labels.clone(),
                annotations: bundle.metadata.annotations.clone(),
                spec: bundle.spec.clone(),
            }),
            SubResource::Status => serde_json::to_vec(&StatusPayload {
                status: bundle.status.clone(),
            }),
        }
        .map_err(|e| CoreError::EncodingError(e.to_string()))?;

        Ok(envelope.payload(Payload::Data(Bytes::from(body))))
    }

    fn decode(&self, envelope: &Envelope) -> Result<ManifestBundle> {
        let event_type = envelope.parsed_type()?;
        self.check(&event_type.data_type)?;

        let uid = envelope.require_text(keys::RESOURCE_ID)?;
        let version = envelope.require_int(keys::RESOURCE_VERSION)?;
        let cluster = envelope.require_text(keys::CLUSTER_NAME)?;

        let mut bundle = ManifestBundle {
            metadata: ObjectMeta {
                uid,
                namespace: cluster,
                resource_version: version.to_string(),
                ..Default::default()
            },
            ..Default::default()
        };

        if let Some(deleted_at) = deletion_time(envelope) {
            bundle.metadata.deletion_timestamp = Some(deleted_at);
            return Ok(bundle);
        }

        let meta = match envelope.get(keys::RESOURCE_META) {
            Some(v) => Some(ResourceMeta::from_attribute(&v.as_text())?),
            None if event_type.sub_resource == SubResource::Spec => {
                return Err(CoreError::MissingAttribute(keys::RESOURCE_META))
            }
            None => None,
        };
        if let Some(meta) = meta {
            bundle.metadata.name = meta.name;
            bundle.ordinal = meta.ordinal;
        }

        let body = envelope
            .data()
            .filter(|b| !b.is_empty())
            .ok_or_else(|| CoreError::InvalidPayload("empty payload".into()))?;

        match event_type.sub_resource {
            SubResource::Spec => {
                let payload: SpecPayload = serde_json::from_slice(body)
                    .map_err(|e| CoreError::InvalidPayload(e.to_string()))?;
                bundle.metadata.generation = payload.generation;
                bundle.metadata.labels = payload.labels;
                bundle.metadata.annotations = payload.annotations;
                bundle.spec = payload.spec;
            }
            SubResource::Status => {
                let payload: StatusPayload = serde_json::from_slice(body)
                    .map_err(|e| CoreError::InvalidPayload(e.to_string()))?;
                bundle.status = payload.status;
            }
        }

        Ok(bundle)
    }
}
