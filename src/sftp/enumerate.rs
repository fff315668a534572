//! Remote file discovery
//!
//! Walks a remote directory tree and keeps the regular files whose basename
//! matches a shell glob and whose modification time falls inside a
//! [`TimeRange`]. Symlinks to regular files are collected under the link's
//! own path with the target's size and mtime; symlinked directories are never
//! descended into.

use glob::Pattern;
use tracing::{debug, info, warn};

use super::error::SftpError;
use super::session::{RemoteSession, SessionFactory};
use super::types::{DirectorySpec, FileEntry, FileType, TimeRange};
use crate::ssh::HostDescriptor;

/// List matching files under `root` over a connected session.
///
/// Directories that cannot be read for permission reasons (or vanished
/// between listing and descent) are skipped with a warning. Any other
/// failure aborts the walk.
pub async fn enumerate(
    session: &dyn RemoteSession,
    root: &str,
    pattern: &str,
    recursive: bool,
    range: &TimeRange,
) -> Result<Vec<FileEntry>, SftpError> {
    let matcher = Pattern::new(pattern).map_err(|e| SftpError::InvalidPattern {
        pattern: pattern.to_string(),
        reason: e.to_string(),
    })?;

    let mut found = Vec::new();
    walk(session, root, &matcher, recursive, range, &mut found).await?;

    debug!(
        "Enumerated {} matching files under {}:{}",
        found.len(),
        session.host().name,
        root
    );
    Ok(found)
}

async fn walk(
    session: &dyn RemoteSession,
    dir: &str,
    matcher: &Pattern,
    recursive: bool,
    range: &TimeRange,
    found: &mut Vec<FileEntry>,
) -> Result<(), SftpError> {
    let entries = match session.list(dir).await {
        Ok(entries) => entries,
        Err(SftpError::PermissionDenied(path)) => {
            warn!("Permission denied accessing {}, skipping", path);
            return Ok(());
        }
        Err(SftpError::FileNotFound(path)) => {
            warn!("Directory {} disappeared, skipping", path);
            return Ok(());
        }
        Err(e) => return Err(e),
    };

    for entry in entries {
        match entry.file_type {
            FileType::Directory => {
                if recursive {
                    Box::pin(walk(session, &entry.path, matcher, recursive, range, found)).await?;
                }
            }
            FileType::File => {
                if matcher.matches(&entry.name) {
                    collect(entry, range, found);
                }
            }
            FileType::Symlink => {
                if !matcher.matches(&entry.name) {
                    continue;
                }
                // stat follows the link
                match session.stat(&entry.path).await {
                    Ok(target) if target.file_type == FileType::File => {
                        let resolved = FileEntry {
                            file_type: FileType::File,
                            size: target.size,
                            modified: target.modified,
                            ..entry
                        };
                        collect(resolved, range, found);
                    }
                    Ok(target) if target.is_dir() => {
                        debug!("Not descending into symlinked directory {}", entry.path);
                    }
                    Ok(_) => {
                        debug!("Skipping symlink {} to a non-regular file", entry.path);
                    }
                    Err(SftpError::FileNotFound(_)) | Err(SftpError::PermissionDenied(_)) => {
                        warn!("Dangling or unreadable symlink {}, skipping", entry.path);
                    }
                    Err(e) => return Err(e),
                }
            }
            FileType::Unknown => {
                debug!("Skipping non-regular entry {}", entry.path);
            }
        }
    }

    Ok(())
}

fn collect(entry: FileEntry, range: &TimeRange, found: &mut Vec<FileEntry>) {
    if range.contains(entry.modified) {
        found.push(entry);
    } else {
        debug!(
            "Skipping {}: modified {:?} outside time range",
            entry.path,
            entry.modified_at()
        );
    }
}

/// Connect to `host`, enumerate `spec`, and disconnect.
///
/// Every failure is reported as [`SftpError::EnumerationFailed`].
pub async fn enumerate_host(
    factory: &dyn SessionFactory,
    host: &HostDescriptor,
    spec: &DirectorySpec,
    range: &TimeRange,
) -> Result<Vec<FileEntry>, SftpError> {
    let failed = |e: SftpError| SftpError::EnumerationFailed {
        host: host.name.clone(),
        path: spec.path.clone(),
        reason: e.to_string(),
    };

    let mut session = factory.create(host);
    session.connect().await.map_err(failed)?;

    let result = enumerate(
        session.as_ref(),
        &spec.path,
        &spec.pattern,
        spec.recursive,
        range,
    )
    .await;
    session.disconnect().await;

    let files = result.map_err(failed)?;
    info!(
        "Found {} files in {}:{} matching '{}'",
        files.len(),
        host.name,
        spec.path,
        spec.pattern
    );
    Ok(files)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sftp::mock::{host, MockRemote};
    use chrono::{TimeZone, Utc};

    const T0: i64 = 1_709_251_200; // 2024-03-01 00:00:00 UTC

    fn remote() -> MockRemote {
        let remote = MockRemote::new();
        remote.add_file("/var/log/app.log", vec![0; 10], T0);
        remote.add_file("/var/log/app.log.1", vec![0; 10], T0 - 86_400);
        remote.add_file("/var/log/syslog", vec![0; 10], T0);
        remote.add_file("/var/log/nginx/access.log", vec![0; 10], T0 + 3_600);
        remote.add_file("/var/log/nginx/deep/error.log", vec![0; 10], T0 + 7_200);
        remote
    }

    async fn connected(remote: &MockRemote) -> Box<dyn RemoteSession> {
        let mut session = remote.create(&host("web"));
        session.connect().await.unwrap();
        session
    }

    fn names(files: &[FileEntry]) -> Vec<String> {
        let mut names: Vec<String> = files.iter().map(|f| f.path.clone()).collect();
        names.sort();
        names
    }

    #[tokio::test]
    async fn test_pattern_and_recursion() {
        let remote = remote();
        let session = connected(&remote).await;
        let all = TimeRange::default();

        let flat = enumerate(session.as_ref(), "/var/log", "*.log", false, &all)
            .await
            .unwrap();
        assert_eq!(names(&flat), vec!["/var/log/app.log"]);

        let deep = enumerate(session.as_ref(), "/var/log", "*.log", true, &all)
            .await
            .unwrap();
        assert_eq!(
            names(&deep),
            vec![
                "/var/log/app.log",
                "/var/log/nginx/access.log",
                "/var/log/nginx/deep/error.log",
            ]
        );
    }

    #[tokio::test]
    async fn test_time_range_is_inclusive() {
        let remote = remote();
        let session = connected(&remote).await;

        let start = Utc.timestamp_opt(T0, 0).unwrap();
        let end = Utc.timestamp_opt(T0 + 3_600, 0).unwrap();
        let range = TimeRange::new(Some(start), Some(end));

        let files = enumerate(session.as_ref(), "/var/log", "*", true, &range)
            .await
            .unwrap();
        assert_eq!(
            names(&files),
            vec![
                "/var/log/app.log",
                "/var/log/nginx/access.log",
                "/var/log/syslog",
            ]
        );
    }

    #[tokio::test]
    async fn test_since_one_day_excludes_older_files() {
        let remote = MockRemote::new();
        let now = T0;
        remote.add_file("/logs/a.log", vec![1], now - 25 * 3_600);
        remote.add_file("/logs/b.log", vec![1], now - 3_600);
        remote.add_file("/logs/c.txt", vec![1], now - 3_600);
        let session = connected(&remote).await;

        let range = TimeRange::since(Utc.timestamp_opt(now - 24 * 3_600, 0).unwrap());
        let files = enumerate(session.as_ref(), "/logs", "*.log", false, &range)
            .await
            .unwrap();
        assert_eq!(names(&files), vec!["/logs/b.log"]);
    }

    #[tokio::test]
    async fn test_permission_denied_subtree_is_skipped() {
        let remote = remote();
        remote.deny("/var/log/nginx");
        let session = connected(&remote).await;

        let files = enumerate(session.as_ref(), "/var/log", "*", true, &TimeRange::default())
            .await
            .unwrap();
        assert_eq!(
            names(&files),
            vec!["/var/log/app.log", "/var/log/app.log.1", "/var/log/syslog"]
        );
    }

    #[tokio::test]
    async fn test_connection_failure_aborts_walk() {
        let remote = remote();
        remote.break_listing("/var/log/nginx/deep");
        let session = connected(&remote).await;

        let result = enumerate(session.as_ref(), "/var/log", "*", true, &TimeRange::default()).await;
        assert!(matches!(result, Err(SftpError::ConnectionFailed(_))));
    }

    #[tokio::test]
    async fn test_invalid_pattern() {
        let remote = remote();
        let session = connected(&remote).await;

        let result = enumerate(session.as_ref(), "/var/log", "[a-", false, &TimeRange::default()).await;
        assert!(matches!(result, Err(SftpError::InvalidPattern { .. })));
    }

    #[tokio::test]
    async fn test_enumerate_host_wraps_failures() {
        let remote = remote();
        let spec = DirectorySpec::new("web", "/var/log").with_pattern("*.log");

        let files = enumerate_host(&remote, &host("web"), &spec, &TimeRange::default())
            .await
            .unwrap();
        assert_eq!(names(&files), vec!["/var/log/app.log"]);
        assert_eq!(remote.active_sessions(), 0);

        remote.fail_auth("db");
        let err = enumerate_host(&remote, &host("db"), &spec, &TimeRange::default())
            .await
            .unwrap_err();
        match err {
            SftpError::EnumerationFailed { host, path, reason } => {
                assert_eq!(host, "db");
                assert_eq!(path, "/var/log");
                assert!(reason.contains("Authentication failed"));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn test_symlinked_files_are_followed() {
        let remote = MockRemote::new();
        remote.add_file("/var/log/app-2024.log", vec![7; 40], T0);
        remote.add_file("/srv/archive/old.log", vec![7; 5], T0 - 10 * 86_400);
        remote.add_file("/srv/nested/inner.log", vec![7; 5], T0);
        remote.add_symlink("/var/log/current.log", "/var/log/app-2024.log", T0 - 30 * 86_400);
        remote.add_symlink("/var/log/stale.log", "/srv/archive/old.log", T0);
        remote.add_symlink("/var/log/dangling.log", "/nowhere/gone.log", T0);
        remote.add_symlink("/var/log/rotated.log", "/srv/nested", T0);
        let session = connected(&remote).await;

        let range = TimeRange::since(Utc.timestamp_opt(T0 - 86_400, 0).unwrap());
        let files = enumerate(session.as_ref(), "/var/log", "*.log", true, &range)
            .await
            .unwrap();
        assert_eq!(
            names(&files),
            vec!["/var/log/app-2024.log", "/var/log/current.log"]
        );

        // Target size and mtime, link's own path and name
        let link = files.iter().find(|f| f.name == "current.log").unwrap();
        assert_eq!(link.file_type, FileType::File);
        assert_eq!(link.size, 40);
        assert_eq!(link.modified, T0);
    }

    #[tokio::test]
    async fn test_symlinked_file_downloads_through_link() {
        let remote = MockRemote::new();
        remote.add_file("/var/log/app-2024.log", b"through the link".to_vec(), T0);
        remote.add_symlink("/var/log/current", "/var/log/app-2024.log", T0);
        let session = connected(&remote).await;

        let entry = session.stat("/var/log/current").await.unwrap();
        assert_eq!(entry.size, 16);
        let mut reader = session.open_read("/var/log/current", 8).await.unwrap();
        let mut rest = String::new();
        tokio::io::AsyncReadExt::read_to_string(&mut reader, &mut rest)
            .await
            .unwrap();
        assert_eq!(rest, "the link");
    }

    #[tokio::test]
    async fn test_missing_root_yields_nothing() {
        let remote = remote();
        let session = connected(&remote).await;
        let files = enumerate(session.as_ref(), "/opt/none", "*", true, &TimeRange::default())
            .await
            .unwrap();
        assert!(files.is_empty());
    }
}
