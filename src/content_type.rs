//! Content-type-by-extension lookup (§8 minimum mapping), an external
//! collaborator the distilled spec names but leaves unspecified beyond the
//! required entries.

pub fn infer_from_key(key: &str) -> String {
    let ext = key.rsplit('.').next().unwrap_or("").to_lowercase();
    match ext.as_str() {
        "txt" => "text/plain",
        "json" => "application/json",
        "yaml" | "yml" => "text/yaml",
        "log" => "text/plain",
        "html" | "htm" => "text/html",
        "css" => "text/css",
        "js" => "application/javascript",
        "xml" => "application/xml",
        "csv" => "text/csv",
        "png" => "image/png",
        "jpg" | "jpeg" => "image/jpeg",
        "gif" => "image/gif",
        "pdf" => "application/pdf",
        "zip" => "application/zip",
        "gz" => "application/gzip",
        "tar" => "application/x-tar",
        _ => "application/octet-stream",
    }
    .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn known_extensions_map_as_specified() {
        assert_eq!(infer_from_key("notes.txt"), "text/plain");
        assert_eq!(infer_from_key("data.json"), "application/json");
        assert_eq!(infer_from_key("config.yaml"), "text/yaml");
        assert_eq!(infer_from_key("config.yml"), "text/yaml");
        assert_eq!(infer_from_key("app.log"), "text/plain");
    }

    #[test]
    fn unknown_extension_falls_back_to_octet_stream() {
        assert_eq!(infer_from_key("archive.mystery"), "application/octet-stream");
        assert_eq!(infer_from_key("noextension"), "application/octet-stream");
    }
}
