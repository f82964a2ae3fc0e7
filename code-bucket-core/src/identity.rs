use uuid::Uuid;

/// Deterministic document id for a file: UUIDv5 in the DNS namespace over
/// `"<repo_url>:<relative_path>"`.
///
/// Content is deliberately not part of the key, so an edited file re-uploads
/// onto the same document instead of creating a second one.
pub fn document_id(repo_url: &str, relative_path: &str) -> Uuid {
    let key = format!("{repo_url}:{relative_path}");
    Uuid::new_v5(&Uuid::NAMESPACE_DNS, key.as_bytes())
}
