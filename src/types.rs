//! Data structures exchanged with the discovery server.
//!
//! These types are serialised using [`serde`](https://serde.rs/) and
//! carried over the discovery stream.  Requests and responses follow the
//! aggregated-discovery shape: every request names the resources it
//! wants and echoes the version/nonce of the last response it accepted,
//! and every response carries a list of typed resource payloads.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Type URL of endpoint-assignment resources.
pub const ENDPOINT_TYPE_URL: &str =
    "type.googleapis.com/envoy.config.endpoint.v3.ClusterLoadAssignment";

/// Suffix the discovery server appends to service names for cluster resources.
const CLUSTER_SUFFIX: &str = "_cluster";

/// Resource name requested for a logical service.
pub fn resource_name(service: &str) -> String {
    format!("{}{}", service, CLUSTER_SUFFIX)
}

/// One network-reachable instance of a logical service.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Endpoint {
    pub host: String,
    pub port: u16,
    /// Advisory load-distribution hint. No policy is attached to it here.
    pub weight: u32,
}

impl Endpoint {
    pub fn new(host: impl Into<String>, port: u16, weight: u32) -> Self {
        Self {
            host: host.into(),
            port,
            weight,
        }
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.host.contains(':') {
            write!(f, "[{}]:{}", self.host, self.port)
        } else {
            write!(f, "{}:{}", self.host, self.port)
        }
    }
}

/// Outbound protocol message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiscoveryRequest {
    pub client_identity: String,
    pub resource_type: String,
    pub resource_names: Vec<String>,
    #[serde(default)]
    pub version_info: String,
    #[serde(default)]
    pub response_nonce: String,
    /// Set when the previous response was rejected.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_detail: Option<String>,
}

/// Inbound protocol message.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DiscoveryResponse {
    #[serde(default)]
    pub version_info: String,
    #[serde(default)]
    pub nonce: String,
    #[serde(default)]
    pub resources: Vec<Resource>,
}

/// A typed, still-encoded resource payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Resource {
    pub type_url: String,
    #[serde(default)]
    pub value: serde_json::Value,
}

/// A resource payload after decoding, keyed by its type.
#[derive(Debug, Clone, PartialEq)]
pub enum DecodedResource {
    Endpoints(ClusterLoadAssignment),
}

impl Resource {
    /// Wraps an endpoint assignment as a resource payload.
    pub fn endpoints(assignment: &ClusterLoadAssignment) -> Result<Self> {
        let value = serde_json::to_value(assignment)
            .map_err(|e| Error::decode(ENDPOINT_TYPE_URL, e))?;
        Ok(Self {
            type_url: ENDPOINT_TYPE_URL.to_string(),
            value,
        })
    }

    pub fn decode(&self) -> Result<DecodedResource> {
        match self.type_url.as_str() {
            ENDPOINT_TYPE_URL => serde_json::from_value(self.value.clone())
                .map(DecodedResource::Endpoints)
                .map_err(|e| Error::decode(&self.type_url, e)),
            other => Err(Error::decode(other, "unsupported resource type")),
        }
    }
}

/// Full endpoint set for one cluster resource.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClusterLoadAssignment {
    #[serde(default)]
    pub cluster_name: String,
    #[serde(default)]
    pub endpoints: Vec<LocalityLbEndpoints>,
}

/// A group of endpoints sharing a locality.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LocalityLbEndpoints {
    #[serde(default)]
    pub lb_endpoints: Vec<LbEndpoint>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LbEndpoint {
    pub address: SocketAddress,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub load_balancing_weight: Option<u32>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SocketAddress {
    pub address: String,
    pub port_value: u32,
}

impl ClusterLoadAssignment {
    /// Builds an assignment with one locality group per endpoint.
    pub fn from_endpoints(cluster_name: impl Into<String>, endpoints: &[Endpoint]) -> Self {
        Self {
            cluster_name: cluster_name.into(),
            endpoints: endpoints
                .iter()
                .map(|ep| LocalityLbEndpoints {
                    lb_endpoints: vec![LbEndpoint {
                        address: SocketAddress {
                            address: ep.host.clone(),
                            port_value: u32::from(ep.port),
                        },
                        load_balancing_weight: Some(ep.weight),
                    }],
                })
                .collect(),
        }
    }

    /// Flattens all locality groups into endpoints. A missing weight reads as 0.
    pub fn to_endpoints(&self) -> Result<Vec<Endpoint>> {
        self.endpoints
            .iter()
            .flat_map(|locality| locality.lb_endpoints.iter())
            .map(|lb| {
                let port = u16::try_from(lb.address.port_value).map_err(|_| {
                    Error::decode(
                        ENDPOINT_TYPE_URL,
                        format!("port {} out of range", lb.address.port_value),
                    )
                })?;
                Ok(Endpoint::new(
                    lb.address.address.clone(),
                    port,
                    lb.load_balancing_weight.unwrap_or_default(),
                ))
            })
            .collect()
    }
}

impl DiscoveryResponse {
    /// Decodes the endpoint list carried by this response.
    ///
    /// Only the first resource is considered. No resources at all means
    /// the service currently has no instances.
    pub fn endpoints(&self) -> Result<Vec<Endpoint>> {
        let Some(first) = self.resources.first() else {
            return Ok(Vec::new());
        };
        match first.decode()? {
            DecodedResource::Endpoints(assignment) => assignment.to_endpoints(),
        }
    }
}
