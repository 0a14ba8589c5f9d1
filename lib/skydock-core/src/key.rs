//! Registry key and service name derivation

use thiserror::Error;

/// Number of leading characters of a workload id used as the instance id
pub const INSTANCE_ID_LEN: usize = 10;

/// Build a registry key from its parts.
///
/// Domain and service labels are emitted root first, so
/// `("/skydns", "dev.skydns.local", "redis", "a1b2c3d4e5")` becomes
/// `/skydns/local/skydns/dev/redis/a1b2c3d4e5`. Empty labels are kept as
/// empty path components.
pub fn derive_key(prefix: &str, domain: &str, service: &str, instance: &str) -> String {
    let mut key = String::from(prefix);
    for label in domain.rsplit('.').chain(service.rsplit('.')) {
        key.push('/');
        key.push_str(label);
    }
    key.push('/');
    key.push_str(instance);
    key
}

/// Short instance id for a workload
pub fn instance_id(workload_id: &str) -> &str {
    match workload_id.char_indices().nth(INSTANCE_ID_LEN) {
        Some((end, _)) => &workload_id[..end],
        None => workload_id,
    }
}

/// KeyDeriver binds the prefix and domain shared by every key of one daemon
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct KeyDeriver {
    prefix: String,
    domain: String,
}

impl KeyDeriver {
    pub fn new(prefix: impl Into<String>, domain: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
            domain: domain.into(),
        }
    }

    pub fn key(&self, service: &str, instance: &str) -> String {
        derive_key(&self.prefix, &self.domain, service, instance)
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("image reference {image:?} has {segments} path segments, expected 1 to 3")]
pub struct NamingError {
    pub image: String,
    pub segments: usize,
}

/// Map an image reference to a service name.
///
/// The tag is dropped, then `image`, `owner/image` and
/// `registry/owner/image` are accepted. With `qualify_owner` the owner is
/// kept: `mischief/foo` becomes `mischief-foo` instead of `foo`.
pub fn image_to_service(image: &str, qualify_owner: bool) -> Result<String, NamingError> {
    let name = image.split(':').next().unwrap_or(image);
    let parts: Vec<&str> = name.split('/').collect();

    match parts.as_slice() {
        [image] => Ok(image.to_string()),
        [owner, image] | [_, owner, image] => {
            if qualify_owner {
                Ok(format!("{}-{}", owner, image))
            } else {
                Ok(image.to_string())
            }
        }
        _ => Err(NamingError {
            image: image.to_string(),
            segments: parts.len(),
        }),
    }
}

/// Service naming policy applied to every workload
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ServiceNaming {
    pub qualify_owner: bool,
}

impl ServiceNaming {
    pub fn new(qualify_owner: bool) -> Self {
        Self { qualify_owner }
    }

    pub fn service_for(&self, image: &str) -> Result<String, NamingError> {
        image_to_service(image, self.qualify_owner)
    }
}
