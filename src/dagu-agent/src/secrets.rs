//! Secret Resolver : a provider registry plus the two reference
//! providers this crate ships (`env`, `file`); any other provider is
//! external, consumed only through `SecretProvider`. Grounded on the
//! `create_client`-style provider-registry pattern paired with
//! `SandboxBackend`'s trait-object shape: register concrete providers by
//! name at construction, look them up by the `SecretRef.provider` key.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use dagu_types::SecretRef;

use crate::contracts::SecretProvider;
use crate::error::{AgentError, Result};

/// Looks providers up by name and resolves every `SecretRef` on a DAG at
/// Agent init (Secrets are resolved once, up front, not lazily
/// per step).
pub struct SecretRegistry {
    providers: HashMap<String, Arc<dyn SecretProvider>>,
}

impl SecretRegistry {
    pub fn new() -> Self {
        Self {
            providers: HashMap::new(),
        }
    }

    pub fn register(&mut self, provider: Arc<dyn SecretProvider>) {
        self.providers.insert(provider.name().to_string(), provider);
    }

    fn get(&self, name: &str) -> Result<&Arc<dyn SecretProvider>> {
        self.providers
            .get(name)
            .ok_or_else(|| AgentError::UnknownSecretProvider(name.to_string()))
    }

    /// Resolve every secret reference, returning `NAME -> value` pairs in
    /// declaration order. Fails closed: any single unresolved secret aborts
    /// the whole batch (Agent init step 3).
    pub async fn resolve_all(
        &self,
        secrets: &[SecretRef],
        working_dir: &Path,
        dag_file_dir: Option<&Path>,
    ) -> Result<Vec<(String, String)>> {
        let mut resolved = Vec::with_capacity(secrets.len());
        for secret_ref in secrets {
            if secret_ref.provider.is_empty() {
                return Err(AgentError::SecretProviderRequired);
            }
            let provider = self.get(&secret_ref.provider)?;
            provider.validate(secret_ref).map_err(|e| match e {
                AgentError::InvalidSecretRef { .. } => e,
                other => AgentError::InvalidSecretRef {
                    name: secret_ref.name.clone(),
                    message: other.to_string(),
                },
            })?;
            let value = provider
                .resolve(secret_ref, working_dir, dag_file_dir)
                .await
                .map_err(|e| AgentError::SecretResolution {
                    name: secret_ref.name.clone(),
                    message: e.to_string(),
                })?;
            resolved.push((secret_ref.name.clone(), value));
        }
        Ok(resolved)
    }

    /// Dry-run validation used by a pre-flight `dagu check` style command;
    /// never fetches secret values.
    pub async fn check_all(
        &self,
        secrets: &[SecretRef],
        working_dir: &Path,
        dag_file_dir: Option<&Path>,
    ) -> Result<()> {
        for secret_ref in secrets {
            if secret_ref.provider.is_empty() {
                return Err(AgentError::SecretProviderRequired);
            }
            let provider = self.get(&secret_ref.provider)?;
            provider.validate(secret_ref)?;
            provider
                .check_accessibility(secret_ref, working_dir, dag_file_dir)
                .await?;
        }
        Ok(())
    }
}

impl Default for SecretRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// Resolves a secret from an environment variable named by `SecretRef.key`.
#[derive(Debug, Default)]
pub struct EnvSecretProvider;

#[async_trait]
impl SecretProvider for EnvSecretProvider {
    fn name(&self) -> &str {
        "env"
    }

    fn validate(&self, secret_ref: &SecretRef) -> Result<()> {
        if secret_ref.key.is_empty() {
            return Err(AgentError::InvalidSecretRef {
                name: secret_ref.name.clone(),
                message: "env provider requires a non-empty key".to_string(),
            });
        }
        Ok(())
    }

    async fn resolve(
        &self,
        secret_ref: &SecretRef,
        _working_dir: &Path,
        _dag_file_dir: Option<&Path>,
    ) -> Result<String> {
        std::env::var(&secret_ref.key).map_err(|_| AgentError::SecretResolution {
            name: secret_ref.name.clone(),
            message: format!("environment variable {} is not set", secret_ref.key),
        })
    }

    async fn check_accessibility(
        &self,
        secret_ref: &SecretRef,
        working_dir: &Path,
        dag_file_dir: Option<&Path>,
    ) -> Result<()> {
        self.resolve(secret_ref, working_dir, dag_file_dir).await.map(|_| ())
    }
}

/// Resolves a secret by reading a file's contents, trimmed. `key` is a
/// path, tried in order against: an absolute path, `working_dir`-relative,
/// then `dag_file_dir`-relative (Base-dir fallback chain).
#[derive(Debug, Default)]
pub struct FileSecretProvider;

impl FileSecretProvider {
    fn candidate_paths(key: &str, working_dir: &Path, dag_file_dir: Option<&Path>) -> Vec<PathBuf> {
        let key_path = Path::new(key);
        if key_path.is_absolute() {
            return vec![key_path.to_path_buf()];
        }
        let mut candidates = vec![working_dir.join(key_path)];
        if let Some(dir) = dag_file_dir {
            candidates.push(dir.join(key_path));
        }
        candidates
    }
}

#[async_trait]
impl SecretProvider for FileSecretProvider {
    fn name(&self) -> &str {
        "file"
    }

    fn validate(&self, secret_ref: &SecretRef) -> Result<()> {
        if secret_ref.key.is_empty() {
            return Err(AgentError::InvalidSecretRef {
                name: secret_ref.name.clone(),
                message: "file provider requires a non-empty path".to_string(),
            });
        }
        Ok(())
    }

    async fn resolve(
        &self,
        secret_ref: &SecretRef,
        working_dir: &Path,
        dag_file_dir: Option<&Path>,
    ) -> Result<String> {
        for candidate in Self::candidate_paths(&secret_ref.key, working_dir, dag_file_dir) {
            if let Ok(contents) = tokio::fs::read_to_string(&candidate).await {
                return Ok(contents.trim_end_matches('\n').to_string());
            }
        }
        Err(AgentError::SecretResolution {
            name: secret_ref.name.clone(),
            message: format!("no candidate path for {} could be read", secret_ref.key),
        })
    }

    async fn check_accessibility(
        &self,
        secret_ref: &SecretRef,
        working_dir: &Path,
        dag_file_dir: Option<&Path>,
    ) -> Result<()> {
        for candidate in Self::candidate_paths(&secret_ref.key, working_dir, dag_file_dir) {
            if tokio::fs::metadata(&candidate).await.is_ok() {
                return Ok(());
            }
        }
        Err(AgentError::SecretResolution {
            name: secret_ref.name.clone(),
            message: format!("no candidate path for {} exists", secret_ref.key),
        })
    }
}
