//! Embedded image recipe.
//!
//! The image wraps the upstream LocalStack entrypoint in `timeout`, so the
//! container (created with auto-remove) tears itself down once the instance
//! timeout elapses, even if the test process died without stopping it.

use std::time::Duration;

use tar::{Builder, Header};

/// Upstream image repository.
pub const UPSTREAM_IMAGE: &str = "localstack/localstack";

/// Repository of locally built images.
pub const LOCAL_IMAGE: &str = "localstack-harness";

const DOCKERFILE: &str = "Dockerfile";

/// Published upstream image for `version`.
pub fn upstream_image(version: &str) -> String {
    format!("{UPSTREAM_IMAGE}:{version}")
}

/// Tag of the locally built image for `version` and `timeout`.
pub fn local_tag(version: &str, timeout: Duration) -> String {
    format!("{LOCAL_IMAGE}:{version}-{}s", timeout_secs(timeout))
}

/// Dockerfile for `version` that self-destructs after `timeout`.
pub fn dockerfile(version: &str, timeout: Duration) -> String {
    format!(
        "FROM {image}\n\
         LABEL org.localstack-harness.timeout=\"{secs}\"\n\
         ENTRYPOINT [\"timeout\", \"{secs}\", \"docker-entrypoint.sh\"]\n",
        image = upstream_image(version),
        secs = timeout_secs(timeout),
    )
}

/// Tar build context holding only the Dockerfile.
pub fn build_context(version: &str, timeout: Duration) -> std::io::Result<Vec<u8>> {
    let content = dockerfile(version, timeout);

    let mut header = Header::new_gnu();
    header.set_size(content.len() as u64);
    header.set_mode(0o644);
    header.set_cksum();

    let mut builder = Builder::new(Vec::new());
    builder.append_data(&mut header, DOCKERFILE, content.as_bytes())?;
    builder.into_inner()
}

fn timeout_secs(timeout: Duration) -> u64 {
    timeout.as_secs().max(1)
}

#[cfg(test)]
mod tests {
    use std::io::Read;

    use super::*;

    #[test]
    fn test_dockerfile_embeds_version_and_timeout() {
        let content = dockerfile("0.11.4", Duration::from_secs(300));

        assert!(content.starts_with("FROM localstack/localstack:0.11.4\n"));
        assert!(content.contains("[\"timeout\", \"300\", \"docker-entrypoint.sh\"]"));
    }

    #[test]
    fn test_sub_second_timeout_rounds_up() {
        assert_eq!(local_tag("latest", Duration::from_millis(10)), "localstack-harness:latest-1s");
    }

    #[test]
    fn test_build_context_holds_dockerfile() {
        let context = build_context("latest", Duration::from_secs(60)).unwrap();
        let mut archive = tar::Archive::new(context.as_slice());
        let mut entries = archive.entries().unwrap();

        let mut entry = entries.next().unwrap().unwrap();
        assert_eq!(entry.path().unwrap().to_str(), Some("Dockerfile"));

        let mut content = String::new();
        entry.read_to_string(&mut content).unwrap();
        assert_eq!(content, dockerfile("latest", Duration::from_secs(60)));
        assert!(entries.next().is_none());
    }
}
