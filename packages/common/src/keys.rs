use crate::reference::Reference;

/// Object store keys for one reference.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StorageKeys {
    /// `{prefix}/{type}/{id}/{hash}`
    pub original: String,
    /// `{prefix}/{type}/{id}/{hash}@{resize}`, or the original key when no
    /// resize was requested.
    pub variant: String,
}

impl StorageKeys {
    pub fn derive(prefix: &str, reference: &Reference) -> Self {
        let prefix = prefix.trim_end_matches('/');
        let mut original = String::new();
        if !prefix.is_empty() {
            original.push_str(prefix);
            original.push('/');
        }
        original.push_str(&format!(
            "{}/{}/{}",
            reference.entity.as_segment(),
            reference.id,
            reference.hash
        ));

        let variant = match &reference.resize {
            Some(directive) => format!("{original}@{directive}"),
            None => original.clone(),
        };

        Self { original, variant }
    }
}
