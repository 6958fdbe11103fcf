use anyhow::{anyhow, Context};
use ssri::{Algorithm, IntegrityOpts};
use std::path::Path;
use tokio::{fs::File, io::AsyncReadExt};

const CHUNK_SIZE: usize = 64 * 1024;

/// Returns the algorithm part of an integrity value, e.g. `sha512` for `sha512-abc=`.
pub(crate) fn hash_type(integrity: &str) -> &str {
    integrity.split('-').next().unwrap_or_default()
}

pub(crate) fn parse_algorithm(hash_type: &str) -> anyhow::Result<Algorithm> {
    match hash_type {
        "sha1" => Ok(Algorithm::Sha1),
        "sha256" => Ok(Algorithm::Sha256),
        "sha384" => Ok(Algorithm::Sha384),
        "sha512" => Ok(Algorithm::Sha512),
        _ => Err(anyhow!("unsupported integrity algorithm `{}`", hash_type)),
    }
}

/// Streams the file at `path` through the digest named by `hash_type`
/// and returns the integrity value as `<hash_type>-<base64 digest>`.
pub(crate) async fn compute_ssri(hash_type: &str, path: &Path) -> anyhow::Result<String> {
    let algorithm = parse_algorithm(hash_type)?;

    let mut file = File::open(path)
        .await
        .with_context(|| format!("failed to open {}", path.display()))?;
    let mut integrity_opts = IntegrityOpts::new().algorithm(algorithm);
    let mut buf = vec![0; CHUNK_SIZE];
    loop {
        let read = file
            .read(&mut buf)
            .await
            .with_context(|| format!("failed to read {}", path.display()))?;
        if read == 0 {
            break;
        }
        integrity_opts.input(&buf[..read]);
    }

    Ok(integrity_opts.result().to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn artifact(content: &[u8]) -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(content).unwrap();
        file
    }

    #[test]
    fn test_hash_type() {
        assert_eq!("sha512", hash_type("sha512-abc+def=="));
        assert_eq!("sha1", hash_type("sha1-qvTGHdzF6KLavt4PO0gs2a6pQ00="));
        assert_eq!("garbage", hash_type("garbage"));
        assert_eq!("", hash_type(""));
    }

    #[test]
    fn test_parse_algorithm() {
        assert!(matches!(parse_algorithm("sha1"), Ok(Algorithm::Sha1)));
        assert!(matches!(parse_algorithm("sha512"), Ok(Algorithm::Sha512)));
        assert!(parse_algorithm("md5").is_err());
        assert!(parse_algorithm("SHA512").is_err());
    }

    #[tokio::test]
    async fn test_compute_ssri() {
        let file = artifact(b"hello");

        assert_eq!(
            "sha1-qvTGHdzF6KLavt4PO0gs2a6pQ00=",
            compute_ssri("sha1", file.path()).await.unwrap()
        );
        assert_eq!(
            "sha256-LPJNul+wow4m6DsqxbninhsWHlwfp0JecwQzYpOLmCQ=",
            compute_ssri("sha256", file.path()).await.unwrap()
        );
        assert_eq!(
            "sha512-m3HSJL1i83hdltRq0+o9czGb+8KJDKra4t/3JRlnPKcjI8PZm6XBHXx6zG4UuMXaDEZjR1wuXDre9G9zvN7AQw==",
            compute_ssri("sha512", file.path()).await.unwrap()
        );
    }

    #[tokio::test]
    async fn test_compute_ssri_spans_chunks() {
        let content = vec![b'x'; CHUNK_SIZE * 2 + 17];
        let file = artifact(&content);

        let mut expected = IntegrityOpts::new().algorithm(Algorithm::Sha512);
        expected.input(&content);

        assert_eq!(
            expected.result().to_string(),
            compute_ssri("sha512", file.path()).await.unwrap()
        );
    }

    #[tokio::test]
    async fn test_compute_ssri_errors() {
        let file = artifact(b"hello");
        assert!(compute_ssri("md5", file.path()).await.is_err());
        assert!(compute_ssri("sha512", Path::new("/nonexistent/artifact.tgz"))
            .await
            .is_err());
    }
}
