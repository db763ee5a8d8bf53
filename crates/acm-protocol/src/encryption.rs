// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Reversible encryption of sensitive element properties.
//!
//! A property is sensitive when its definition carries `sensitive: "true"`
//! metadata, directly or through the data types it refers to. Sensitive
//! string values are replaced by `ENCRYPTED:` followed by
//! `base64(IV || CIPHERTEXT)`, where the cipher is AES-256-GCM with a fresh
//! 12-byte IV per value and the key is derived from a pass phrase with
//! PBKDF2-HMAC-SHA256.
//!
//! The shape of the property tree never changes: only string leaves are
//! rewritten. Decryption rewrites every marked string it finds, so it does
//! not need the definition.

use std::collections::{BTreeSet, HashMap, HashSet};
use std::sync::Arc;

use aes_gcm::aead::Aead;
use aes_gcm::{Aes256Gcm, Key, KeyInit, Nonce};
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use rand::RngCore;
use serde_json::{Map, Value};
use sha2::Sha256;
use zeroize::Zeroizing;

use crate::model::{AcElement, AutomationComposition, PropertyDefinition, ServiceTemplate};

/// Marker prefix of encrypted values.
pub const ENCRYPTED_PREFIX: &str = "ENCRYPTED:";

const IV_LEN: usize = 12;
const TAG_LEN: usize = 16;
const KEY_LEN: usize = 32;
const PBKDF2_ROUNDS: u32 = 65_536;
const PBKDF2_SALT: &[u8] = b"salt";

/// Errors from the encryption subsystem.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum EncryptionError {
    #[error("encryption is enabled but no pass phrase is configured")]
    MissingPassPhrase,

    #[error("failed to encrypt field '{field}'")]
    Encrypt { field: String },

    #[error("failed to decrypt field '{field}': {reason}")]
    Decrypt { field: String, reason: String },
}

// ============================================================================
// Sensitivity discovery
// ============================================================================

/// Sensitive property names per element definition, resolved once from a
/// service template and then treated as immutable.
#[derive(Debug, Clone, Default)]
pub struct SensitivityIndex {
    by_element: HashMap<String, BTreeSet<String>>,
}

impl SensitivityIndex {
    /// Resolve every node template of the service template.
    pub fn build(template: &ServiceTemplate) -> Self {
        let mut by_element = HashMap::new();
        for (name, node_template) in &template.node_templates {
            let mut keys = BTreeSet::new();
            let mut seen = HashSet::new();
            let mut node_type = Some(node_template.type_name.as_str());
            while let Some(type_name) = node_type {
                if !seen.insert(type_name.to_string()) {
                    break;
                }
                let Some(definition) = template.node_types.get(type_name) else {
                    break;
                };
                collect_sensitive(template, definition.properties.iter(), &mut keys, &mut seen);
                node_type = definition.derived_from.as_deref();
            }
            if !keys.is_empty() {
                by_element.insert(name.clone(), keys);
            }
        }
        Self { by_element }
    }

    /// Sensitive keys of an element definition, if it has any.
    pub fn sensitive_keys(&self, element_name: &str) -> Option<&BTreeSet<String>> {
        self.by_element.get(element_name)
    }

    pub fn is_empty(&self) -> bool {
        self.by_element.is_empty()
    }
}

fn collect_sensitive<'a>(
    template: &ServiceTemplate,
    properties: impl Iterator<Item = (&'a String, &'a PropertyDefinition)>,
    keys: &mut BTreeSet<String>,
    seen: &mut HashSet<String>,
) {
    for (name, property) in properties {
        if property.is_sensitive() {
            keys.insert(name.clone());
        }
        for type_name in property.referenced_types() {
            let mut data_type_name = Some(type_name);
            while let Some(current) = data_type_name {
                // Cycle guard shared with node types; names never collide in practice
                if !seen.insert(current.to_string()) {
                    break;
                }
                let Some(data_type) = template.data_types.get(current) else {
                    break;
                };
                collect_sensitive(template, data_type.properties.iter(), keys, seen);
                data_type_name = data_type.derived_from.as_deref();
            }
        }
    }
}

// ============================================================================
// Service
// ============================================================================

/// Encrypts and decrypts sensitive values. A disabled service passes every
/// value through unchanged.
#[derive(Clone)]
pub struct EncryptionService {
    cipher: Option<Arc<Aes256Gcm>>,
}

impl std::fmt::Debug for EncryptionService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EncryptionService")
            .field("enabled", &self.is_enabled())
            .finish()
    }
}

impl EncryptionService {
    /// Service that leaves every value untouched.
    pub fn disabled() -> Self {
        Self { cipher: None }
    }

    /// Enabled service with a key derived from `pass_phrase`.
    pub fn new(pass_phrase: &str) -> Result<Self, EncryptionError> {
        if pass_phrase.is_empty() {
            return Err(EncryptionError::MissingPassPhrase);
        }
        let mut key = Zeroizing::new([0u8; KEY_LEN]);
        pbkdf2::pbkdf2_hmac::<Sha256>(
            pass_phrase.as_bytes(),
            PBKDF2_SALT,
            PBKDF2_ROUNDS,
            key.as_mut_slice(),
        );
        let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(key.as_slice()));
        Ok(Self {
            cipher: Some(Arc::new(cipher)),
        })
    }

    /// Build from deployment settings.
    pub fn from_settings(enabled: bool, pass_phrase: Option<&str>) -> Result<Self, EncryptionError> {
        if !enabled {
            return Ok(Self::disabled());
        }
        Self::new(pass_phrase.ok_or(EncryptionError::MissingPassPhrase)?)
    }

    pub fn is_enabled(&self) -> bool {
        self.cipher.is_some()
    }

    /// Whether a string carries the encrypted marker.
    pub fn is_encrypted(value: &str) -> bool {
        value.starts_with(ENCRYPTED_PREFIX)
    }

    /// Encrypt one value. Already marked values are returned unchanged.
    pub fn encrypt_value(&self, field: &str, plain: &str) -> Result<String, EncryptionError> {
        let Some(cipher) = &self.cipher else {
            return Ok(plain.to_string());
        };
        if Self::is_encrypted(plain) {
            return Ok(plain.to_string());
        }
        let mut iv = [0u8; IV_LEN];
        rand::rng().fill_bytes(&mut iv);
        let ciphertext = cipher
            .encrypt(Nonce::from_slice(&iv), plain.as_bytes())
            .map_err(|_| EncryptionError::Encrypt {
                field: field.to_string(),
            })?;

        let mut payload = Vec::with_capacity(IV_LEN + ciphertext.len());
        payload.extend_from_slice(&iv);
        payload.extend_from_slice(&ciphertext);
        Ok(format!("{ENCRYPTED_PREFIX}{}", STANDARD.encode(payload)))
    }

    /// Decrypt one value. Unmarked values are returned unchanged.
    pub fn decrypt_value(&self, field: &str, value: &str) -> Result<String, EncryptionError> {
        let Some(cipher) = &self.cipher else {
            return Ok(value.to_string());
        };
        let Some(encoded) = value.strip_prefix(ENCRYPTED_PREFIX) else {
            return Ok(value.to_string());
        };
        let fail = |reason: &str| EncryptionError::Decrypt {
            field: field.to_string(),
            reason: reason.to_string(),
        };

        let payload = STANDARD
            .decode(encoded)
            .map_err(|_| fail("invalid base64"))?;
        if payload.len() < IV_LEN + TAG_LEN {
            return Err(fail("ciphertext truncated"));
        }
        let (iv, ciphertext) = payload.split_at(IV_LEN);
        let plain = cipher
            .decrypt(Nonce::from_slice(iv), ciphertext)
            .map_err(|_| fail("authentication failed"))?;
        String::from_utf8(plain).map_err(|_| fail("plaintext is not UTF-8"))
    }

    /// Encrypt the sensitive values of every element of an instance.
    ///
    /// The sensitivity index is resolved once for the whole pass.
    pub fn find_and_encrypt(
        &self,
        instance: &mut AutomationComposition,
        template: &ServiceTemplate,
    ) -> Result<(), EncryptionError> {
        if !self.is_enabled() {
            return Ok(());
        }
        let index = SensitivityIndex::build(template);
        self.encrypt_elements(instance.elements.values_mut(), &index)
    }

    /// Encrypt the sensitive values of the given elements.
    pub fn encrypt_elements<'a>(
        &self,
        elements: impl IntoIterator<Item = &'a mut AcElement>,
        index: &SensitivityIndex,
    ) -> Result<(), EncryptionError> {
        if !self.is_enabled() {
            return Ok(());
        }
        for element in elements {
            if let Some(keys) = index.sensitive_keys(&element.definition.name) {
                let mut path = Vec::new();
                self.encrypt_map(&mut element.properties, keys, false, &mut path)?;
            }
        }
        Ok(())
    }

    /// Decrypt every marked value of an instance.
    pub fn decrypt_instance(&self, instance: &mut AutomationComposition) -> Result<(), EncryptionError> {
        for element in instance.elements.values_mut() {
            self.decrypt_properties(&mut element.properties)?;
        }
        Ok(())
    }

    /// Decrypt every marked value in a property tree.
    pub fn decrypt_properties(&self, properties: &mut Map<String, Value>) -> Result<(), EncryptionError> {
        if !self.is_enabled() {
            return Ok(());
        }
        let mut path = Vec::new();
        for (key, value) in properties.iter_mut() {
            path.push(key.clone());
            self.decrypt_tree(value, &mut path)?;
            path.pop();
        }
        Ok(())
    }

    fn encrypt_map(
        &self,
        map: &mut Map<String, Value>,
        keys: &BTreeSet<String>,
        sensitive: bool,
        path: &mut Vec<String>,
    ) -> Result<(), EncryptionError> {
        for (key, value) in map.iter_mut() {
            path.push(key.clone());
            self.encrypt_tree(value, keys, sensitive || keys.contains(key), path)?;
            path.pop();
        }
        Ok(())
    }

    fn encrypt_tree(
        &self,
        value: &mut Value,
        keys: &BTreeSet<String>,
        sensitive: bool,
        path: &mut Vec<String>,
    ) -> Result<(), EncryptionError> {
        match value {
            Value::Object(map) => self.encrypt_map(map, keys, sensitive, path),
            Value::Array(items) => {
                for (i, item) in items.iter_mut().enumerate() {
                    path.push(format!("[{i}]"));
                    self.encrypt_tree(item, keys, sensitive, path)?;
                    path.pop();
                }
                Ok(())
            }
            Value::String(s) if sensitive => {
                *s = self.encrypt_value(&field_path(path), s)?;
                Ok(())
            }
            _ => Ok(()),
        }
    }

    fn decrypt_tree(&self, value: &mut Value, path: &mut Vec<String>) -> Result<(), EncryptionError> {
        match value {
            Value::Object(map) => {
                for (key, child) in map.iter_mut() {
                    path.push(key.clone());
                    self.decrypt_tree(child, path)?;
                    path.pop();
                }
                Ok(())
            }
            Value::Array(items) => {
                for (i, item) in items.iter_mut().enumerate() {
                    path.push(format!("[{i}]"));
                    self.decrypt_tree(item, path)?;
                    path.pop();
                }
                Ok(())
            }
            Value::String(s) if Self::is_encrypted(s) => {
                *s = self.decrypt_value(&field_path(path), s)?;
                Ok(())
            }
            _ => Ok(()),
        }
    }
}

/// `a.b[0].c` style path of a property.
fn field_path(path: &[String]) -> String {
    let mut out = String::new();
    for segment in path {
        if !out.is_empty() && !segment.starts_with('[') {
            out.push('.');
        }
        out.push_str(segment);
    }
    out
}
