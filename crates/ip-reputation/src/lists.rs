use std::io::BufRead;
use std::net::IpAddr;
use std::path::Path;
use std::sync::Arc;

use arc_swap::ArcSwap;
use async_trait::async_trait;
use ipnet::IpNet;
use shopguard_common::IpPrefixMap;
use tracing::{debug, info, warn};

use crate::{IntelligenceSource, SourceReport};

/// CIDR allow/block lists backed by prefix tries.
///
/// Uses `ArcSwap` so the lists can be reloaded without blocking lookups in
/// the request path.
pub struct IpLists {
    blocklist: ArcSwap<IpPrefixMap<()>>,
    allowlist: ArcSwap<IpPrefixMap<()>>,
}

impl IpLists {
    pub fn new() -> Self {
        Self {
            blocklist: ArcSwap::from_pointee(IpPrefixMap::new()),
            allowlist: ArcSwap::from_pointee(IpPrefixMap::new()),
        }
    }

    /// Load a blocklist from a file.
    ///
    /// The file holds one IP address or CIDR range per line. Empty lines and
    /// lines starting with `#` are skipped; bare addresses become /32 or /128.
    ///
    /// Returns the number of entries loaded.
    pub fn load_blocklist(&self, path: &Path) -> anyhow::Result<usize> {
        let map = load_prefix_file(path)?;
        let count = map.len();
        self.blocklist.store(Arc::new(map));
        info!(path = %path.display(), count, "loaded blocklist");
        Ok(count)
    }

    /// Load an allowlist from a file. Same format as the blocklist.
    pub fn load_allowlist(&self, path: &Path) -> anyhow::Result<usize> {
        let map = load_prefix_file(path)?;
        let count = map.len();
        self.allowlist.store(Arc::new(map));
        info!(path = %path.display(), count, "loaded allowlist");
        Ok(count)
    }

    pub fn is_blocked(&self, addr: IpAddr) -> bool {
        self.blocklist.load().contains(addr)
    }

    pub fn is_allowed(&self, addr: IpAddr) -> bool {
        self.allowlist.load().contains(addr)
    }

    /// Reload both lists. A `None` path clears the list; a failed load leaves
    /// the existing list in place and returns the error.
    pub fn reload_from_config(
        &self,
        blocklist_path: Option<&Path>,
        allowlist_path: Option<&Path>,
    ) -> anyhow::Result<()> {
        match blocklist_path {
            Some(path) => {
                self.load_blocklist(path)?;
            }
            None => {
                self.blocklist.store(Arc::new(IpPrefixMap::new()));
                debug!("cleared blocklist (no path configured)");
            }
        }

        match allowlist_path {
            Some(path) => {
                self.load_allowlist(path)?;
            }
            None => {
                self.allowlist.store(Arc::new(IpPrefixMap::new()));
                debug!("cleared allowlist (no path configured)");
            }
        }

        Ok(())
    }
}

impl Default for IpLists {
    fn default() -> Self {
        Self::new()
    }
}

/// Intelligence source reporting blocklisted addresses with the maximum score.
pub struct StaticListSource {
    lists: Arc<IpLists>,
}

impl StaticListSource {
    pub fn new(lists: Arc<IpLists>) -> Self {
        Self { lists }
    }
}

#[async_trait]
impl IntelligenceSource for StaticListSource {
    fn name(&self) -> &str {
        "static-blocklist"
    }

    async fn lookup(&self, ip: IpAddr) -> anyhow::Result<Option<SourceReport>> {
        if self.lists.is_blocked(ip) {
            Ok(Some(SourceReport {
                score: 100,
                categories: vec!["blocklist".to_string()],
                confidence: 1.0,
            }))
        } else {
            Ok(None)
        }
    }
}

fn load_prefix_file(path: &Path) -> anyhow::Result<IpPrefixMap<()>> {
    let file = std::fs::File::open(path)
        .map_err(|e| anyhow::anyhow!("failed to open {}: {}", path.display(), e))?;
    let reader = std::io::BufReader::new(file);

    let mut map = IpPrefixMap::new();

    for (line_num, line_result) in reader.lines().enumerate() {
        let line = line_result?;
        let trimmed = line.trim();

        if trimmed.is_empty() || trimmed.starts_with('#') {
            continue;
        }

        if let Ok(network) = trimmed.parse::<IpNet>() {
            map.insert(network, ());
        } else if let Ok(addr) = trimmed.parse::<IpAddr>() {
            let prefix_len = match addr {
                IpAddr::V4(_) => 32,
                IpAddr::V6(_) => 128,
            };
            let network = IpNet::new(addr, prefix_len)
                .map_err(|e| anyhow::anyhow!("invalid host prefix for {}: {}", addr, e))?;
            map.insert(network, ());
        } else {
            warn!(
                path = %path.display(),
                line = line_num + 1,
                content = trimmed,
                "skipping unparseable line"
            );
        }
    }

    Ok(map)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write as _;

    /// Temporary file removed on drop.
    struct TempFile {
        path: std::path::PathBuf,
    }

    impl TempFile {
        fn new(contents: &str) -> Self {
            let id = std::time::SystemTime::now()
                .duration_since(std::time::UNIX_EPOCH)
                .unwrap()
                .as_nanos();
            let path = std::env::temp_dir()
                .join(format!("shopguard_lists_test_{}_{}", id, std::process::id()));
            let mut f = std::fs::File::create(&path).unwrap();
            f.write_all(contents.as_bytes()).unwrap();
            f.flush().unwrap();
            Self { path }
        }

        fn path(&self) -> &Path {
            &self.path
        }
    }

    impl Drop for TempFile {
        fn drop(&mut self) {
            let _ = std::fs::remove_file(&self.path);
        }
    }

    #[test]
    fn test_new_is_empty() {
        let lists = IpLists::new();
        assert!(!lists.is_blocked("10.0.0.1".parse().unwrap()));
        assert!(!lists.is_allowed("10.0.0.1".parse().unwrap()));
    }

    #[test]
    fn test_load_blocklist_skips_comments_and_bad_lines() {
        let file = TempFile::new(
            "# Known abusers\n\
             45.155.205.0/24\n\
             185.220.101.1\n\
             \n\
             not-an-ip\n\
             2001:db8::/32\n",
        );

        let lists = IpLists::new();
        assert_eq!(lists.load_blocklist(file.path()).unwrap(), 3);

        assert!(lists.is_blocked("45.155.205.77".parse().unwrap()));
        assert!(lists.is_blocked("185.220.101.1".parse().unwrap()));
        assert!(!lists.is_blocked("185.220.101.2".parse().unwrap()));
        assert!(lists.is_blocked("2001:db8::1".parse().unwrap()));
    }

    #[test]
    fn test_reload_replaces_and_clears_lists() {
        let block = TempFile::new("10.0.0.0/8\n");
        let allow = TempFile::new("10.0.0.1\n");

        let lists = IpLists::new();
        lists.reload_from_config(Some(block.path()), Some(allow.path())).unwrap();
        assert!(lists.is_allowed("10.0.0.1".parse().unwrap()));
        assert!(lists.is_blocked("10.0.0.2".parse().unwrap()));

        lists.reload_from_config(None, Some(allow.path())).unwrap();
        assert!(!lists.is_blocked("10.0.0.2".parse().unwrap()));
        assert!(lists.is_allowed("10.0.0.1".parse().unwrap()));
    }

    #[test]
    fn test_failed_reload_keeps_lists() {
        let block = TempFile::new("10.0.0.0/8\n");
        let lists = IpLists::new();
        lists.load_blocklist(block.path()).unwrap();

        let missing = Path::new("/nonexistent/blocklist.txt");
        assert!(lists.reload_from_config(Some(missing), None).is_err());
        assert!(lists.is_blocked("10.0.0.2".parse().unwrap()));
    }

    #[test]
    fn test_file_not_found() {
        let lists = IpLists::new();
        assert!(lists.load_blocklist(Path::new("/nonexistent/blocklist.txt")).is_err());
    }

    #[tokio::test]
    async fn test_static_source_reports_blocklisted() {
        let file = TempFile::new("203.0.113.0/24\n");
        let lists = Arc::new(IpLists::new());
        lists.load_blocklist(file.path()).unwrap();

        let source = StaticListSource::new(lists);
        let report = source.lookup("203.0.113.9".parse().unwrap()).await.unwrap();
        assert_eq!(report.map(|r| r.score), Some(100));
        assert!(source.lookup("198.51.100.1".parse().unwrap()).await.unwrap().is_none());
    }
}
