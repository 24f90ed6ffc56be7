use std::collections::{BTreeSet, HashMap};
use std::path::PathBuf;

use chrono::{DateTime, NaiveDate, Utc};
use serde::Serialize;
use serde_json::{Map, Value as Json};

use crate::cache::VaultCaches;
use crate::error::GatewayError;
use crate::fanout;
use crate::frontmatter;
use crate::paths;
use crate::template;
use crate::upstream::{NoteStat, VaultApi};

/// How much of a note the header probe reads during lazy enrichment.
const HEADER_PROBE_BYTES: usize = 500;

/// A discovered note. `headers: None` means extraction has not run;
/// `Some({})` means it ran and found nothing usable.
#[derive(Debug, Clone, Serialize)]
pub struct NoteMetadata {
    pub path: String,
    pub name: String,
    pub size_bytes: u64,
    pub modified_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub headers: Option<Map<String, Json>>,
}

/// Folder counts are direct children only, not transitive.
#[derive(Debug, Clone, Serialize)]
pub struct FolderInfo {
    pub path: String,
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parent: Option<String>,
    pub notes_count: usize,
    pub subfolders_count: usize,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct VaultStructure {
    pub root_path: String,
    pub folders: Vec<FolderInfo>,
    pub notes: Vec<NoteMetadata>,
    pub total_notes: usize,
    pub total_folders: usize,
}

/// What the notes-cache slot holds.
#[derive(Debug, Clone)]
pub struct NotesSnapshot {
    pub notes: Vec<NoteMetadata>,
    pub has_headers: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct HitMetadata {
    pub size_bytes: u64,
    pub modified_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize)]
pub struct SearchHit {
    pub path: String,
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub snippet: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata: Option<HitMetadata>,
}

#[derive(Debug, Clone, Serialize)]
pub struct KeywordHit {
    pub path: String,
    pub name: String,
    pub context: String,
}

pub struct VaultConfig {
    /// Enables the filesystem-fallback scan when set.
    pub fs_root: Option<PathBuf>,
    pub batch_size: usize,
    pub snippet_radius: usize,
}

/// The vault access layer: discovery and enrichment over the upstream
/// client, fronted by the TTL caches. All mutations go through here so the
/// caches cannot miss an invalidation.
pub struct Vault {
    api: VaultApi,
    caches: VaultCaches,
    config: VaultConfig,
}

struct ScanItem {
    path: String,
    stat: Option<NoteStat>,
}

impl Vault {
    pub fn new(api: VaultApi, caches: VaultCaches, config: VaultConfig) -> Self {
        Self {
            api,
            caches,
            config,
        }
    }

    // ---- reads -----------------------------------------------------------

    pub async fn read_note(&self, path: &str) -> Result<String, GatewayError> {
        self.api.get_note(path).await
    }

    pub async fn note_stat(&self, path: &str) -> Result<NoteStat, GatewayError> {
        self.api.note_stat(path).await
    }

    pub async fn execute_command(
        &self,
        name: &str,
        params: Option<&Json>,
    ) -> Result<Json, GatewayError> {
        // Commands may mutate the vault upstream, so the caches go stale
        // either way.
        let result = self.api.execute_command(name, params).await;
        self.caches.invalidate();
        result
    }

    // ---- writes (cache invalidation is unconditional) --------------------

    pub async fn put_note(
        &self,
        path: &str,
        body: &str,
        create_folders: bool,
    ) -> Result<(), GatewayError> {
        let result = self.api.put_note(path, body, create_folders).await;
        // Invalidate before returning, success or not: partial upstream
        // side effects are possible on failure.
        self.caches.invalidate();
        result
    }

    pub async fn delete_note(&self, path: &str) -> Result<(), GatewayError> {
        let result = self.api.delete_note(path).await;
        self.caches.invalidate();
        result
    }

    // ---- discovery -------------------------------------------------------

    /// Stage-1 scan plus lazy stage-2 header enrichment, cache-aware. A
    /// fresh snapshot without headers does not satisfy a request that wants
    /// them (the lazy-upgrade rule).
    pub async fn discover(&self, include_headers: bool) -> Result<Vec<NoteMetadata>, GatewayError> {
        if let Some(snapshot) = self.caches.notes.get_fresh()
            && (!include_headers || snapshot.has_headers)
        {
            return Ok(snapshot.notes);
        }

        let (items, _) = self.scan().await?;
        let notes = self.build_notes(items, include_headers).await;
        self.caches.notes.put(NotesSnapshot {
            notes: notes.clone(),
            has_headers: include_headers,
        });
        Ok(notes)
    }

    pub async fn list_notes(
        &self,
        folder: Option<&str>,
        include_headers: bool,
    ) -> Result<Vec<NoteMetadata>, GatewayError> {
        let notes = self.discover(include_headers).await?;
        Ok(filter_by_folder(notes, folder))
    }

    pub async fn structure(&self, use_cache: bool) -> Result<VaultStructure, GatewayError> {
        if use_cache
            && let Some(cached) = self.caches.structure.get_fresh()
        {
            return Ok(cached);
        }

        let (items, folders) = self.scan().await?;
        let notes = self.build_notes(items, false).await;
        let root_path = self
            .config
            .fs_root
            .as_ref()
            .map(|p| p.display().to_string())
            .unwrap_or_default();
        let structure = assemble_structure(root_path, folders, notes);
        self.caches.structure.put(structure.clone());
        Ok(structure)
    }

    pub async fn daily_notes_between(
        &self,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<Vec<NoteMetadata>, GatewayError> {
        let notes = self.discover(false).await?;
        Ok(notes
            .into_iter()
            .filter(|note| {
                template::daily_file_date(&note.path)
                    .is_some_and(|date| date >= start && date <= end)
            })
            .collect())
    }

    // ---- search ----------------------------------------------------------

    /// Upstream simple search, each hit enriched with its stat. All stat
    /// fetches run at once (the hit count is small); hits whose enrichment
    /// fails are filtered out, survivors keep input order.
    pub async fn search(
        &self,
        query: &str,
        folder: Option<&str>,
    ) -> Result<Vec<SearchHit>, GatewayError> {
        let hits = self.api.search_simple(query, folder).await?;

        let stats = fanout::gather_isolated(hits.iter().map(|hit| {
            let api = self.api.clone();
            let path = hit.path.clone();
            async move { api.note_stat(&path).await }
        }))
        .await;

        Ok(hits
            .into_iter()
            .zip(stats)
            .filter_map(|(hit, stat)| {
                let stat = stat?;
                Some(SearchHit {
                    name: paths::name_of(&hit.path).to_string(),
                    path: hit.path,
                    snippet: hit.snippet,
                    metadata: Some(HitMetadata {
                        size_bytes: stat.size,
                        modified_at: stat.modified,
                    }),
                })
            })
            .collect())
    }

    /// Linear keyword scan over note bodies, batched reads, early exit at
    /// the first batch boundary after `limit` is satisfied. A failed read
    /// is a non-match.
    pub async fn keyword_search(
        &self,
        keyword: &str,
        folder: Option<&str>,
        case_sensitive: bool,
        limit: Option<usize>,
    ) -> Result<Vec<KeywordHit>, GatewayError> {
        if limit == Some(0) {
            return Ok(Vec::new());
        }

        let candidates = filter_by_folder(self.discover(false).await?, folder);
        let mut hits = Vec::new();

        for chunk in candidates.chunks(self.config.batch_size.max(1)) {
            let bodies = fanout::gather_isolated(chunk.iter().map(|note| {
                let api = self.api.clone();
                let path = note.path.clone();
                async move { api.get_note(&path).await }
            }))
            .await;

            for (note, body) in chunk.iter().zip(bodies) {
                let Some(body) = body else { continue };
                if let Some((start, end)) = find_keyword(&body, keyword, case_sensitive) {
                    hits.push(KeywordHit {
                        path: note.path.clone(),
                        name: note.name.clone(),
                        context: context_snippet(&body, start, end, self.config.snippet_radius),
                    });
                }
            }

            if let Some(limit) = limit
                && hits.len() >= limit
            {
                break;
            }
        }

        if let Some(limit) = limit {
            hits.truncate(limit);
        }
        Ok(hits)
    }

    // ---- scan + enrichment internals -------------------------------------

    async fn scan(&self) -> Result<(Vec<ScanItem>, Vec<String>), GatewayError> {
        match self.scan_upstream().await {
            Ok(result) => Ok(result),
            Err(e) => match &self.config.fs_root {
                Some(root) => {
                    tracing::warn!("upstream listing failed, scanning filesystem instead: {e}");
                    scan_filesystem(root.clone()).await
                }
                None => Err(e),
            },
        }
    }

    /// Breadth-first walk of the upstream tree. Listing entries with a
    /// trailing slash are folders.
    async fn scan_upstream(&self) -> Result<(Vec<ScanItem>, Vec<String>), GatewayError> {
        let mut queue = vec![String::new()];
        let mut folders = Vec::new();
        let mut notes = Vec::new();

        while let Some(folder) = queue.pop() {
            for entry in self.api.list_files(&folder).await? {
                let full = if folder.is_empty() {
                    entry.clone()
                } else {
                    format!("{folder}/{entry}")
                };
                if let Some(sub) = full.strip_suffix('/') {
                    folders.push(sub.to_string());
                    queue.push(sub.to_string());
                } else if full.ends_with(".md") {
                    notes.push(ScanItem {
                        path: full,
                        stat: None,
                    });
                }
            }
        }

        notes.sort_by(|a, b| a.path.cmp(&b.path));
        folders.sort();
        Ok((notes, folders))
    }

    /// Stage 1 fills missing stats in bounded batches (a failed stat
    /// degrades the entry rather than failing the scan); stage 2 extracts
    /// headers from the first [`HEADER_PROBE_BYTES`] of each body, also
    /// batched, iff the caller asked.
    async fn build_notes(&self, items: Vec<ScanItem>, include_headers: bool) -> Vec<NoteMetadata> {
        let batch = self.config.batch_size;

        let missing: Vec<String> = items
            .iter()
            .filter(|item| item.stat.is_none())
            .map(|item| item.path.clone())
            .collect();
        let fetched = fanout::batched_isolated(missing, batch, |path| {
            let api = self.api.clone();
            async move { api.note_stat(&path).await.map(|stat| (path, stat)) }
        })
        .await;
        let mut fetched_by_path: HashMap<String, NoteStat> =
            fetched.into_iter().flatten().collect();

        let mut notes: Vec<NoteMetadata> = items
            .into_iter()
            .map(|item| {
                let stat = item
                    .stat
                    .or_else(|| fetched_by_path.remove(&item.path))
                    .unwrap_or(NoteStat {
                        size: 0,
                        modified: DateTime::<Utc>::default(),
                        created: None,
                    });
                NoteMetadata {
                    name: paths::name_of(&item.path).to_string(),
                    path: item.path,
                    size_bytes: stat.size,
                    modified_at: stat.modified,
                    created_at: stat.created,
                    headers: None,
                }
            })
            .collect();

        if include_headers {
            let all: Vec<String> = notes.iter().map(|note| note.path.clone()).collect();
            let bodies = fanout::batched_isolated(all, batch, |path| {
                let api = self.api.clone();
                async move { api.get_note(&path).await }
            })
            .await;
            for (note, body) in notes.iter_mut().zip(bodies) {
                let headers = body
                    .as_deref()
                    .and_then(|b| frontmatter::parse_prefix(b, HEADER_PROBE_BYTES))
                    .map(|block| block.to_json())
                    .unwrap_or_default();
                note.headers = Some(headers);
            }
        }

        notes
    }
}

fn filter_by_folder(notes: Vec<NoteMetadata>, folder: Option<&str>) -> Vec<NoteMetadata> {
    match folder {
        None | Some("") => notes,
        Some(folder) => {
            let prefix = format!("{}/", folder.trim_end_matches('/'));
            notes
                .into_iter()
                .filter(|note| note.path.starts_with(&prefix))
                .collect()
        }
    }
}

/// Builds the navigable structure from a scan. Every ancestor of every
/// note is guaranteed a folder entry even when the scan itself did not
/// report it.
fn assemble_structure(
    root_path: String,
    folders: Vec<String>,
    notes: Vec<NoteMetadata>,
) -> VaultStructure {
    let mut all: BTreeSet<String> = folders.into_iter().collect();
    for note in &notes {
        let mut parent = paths::parent_of(&note.path);
        while let Some(p) = parent {
            all.insert(p.to_string());
            parent = paths::parent_of(p);
        }
    }

    let folder_infos: Vec<FolderInfo> = all
        .iter()
        .map(|path| FolderInfo {
            name: paths::name_of(path).to_string(),
            parent: paths::parent_of(path).map(str::to_string),
            notes_count: notes
                .iter()
                .filter(|n| paths::parent_of(&n.path).unwrap_or("") == path)
                .count(),
            subfolders_count: all
                .iter()
                .filter(|f| paths::parent_of(f) == Some(path))
                .count(),
            path: path.clone(),
        })
        .collect();

    VaultStructure {
        root_path,
        total_notes: notes.len(),
        total_folders: folder_infos.len(),
        folders: folder_infos,
        notes,
    }
}

async fn scan_filesystem(root: PathBuf) -> Result<(Vec<ScanItem>, Vec<String>), GatewayError> {
    tokio::task::spawn_blocking(move || {
        let mut notes = Vec::new();
        let mut folders = Vec::new();

        for entry in walkdir::WalkDir::new(&root).into_iter().filter_map(|e| e.ok()) {
            let Ok(rel) = entry.path().strip_prefix(&root) else {
                continue;
            };
            if rel.as_os_str().is_empty() {
                continue;
            }
            let rel_path = rel.to_string_lossy().replace('\\', "/");

            if entry.file_type().is_dir() {
                folders.push(rel_path);
            } else if entry.file_type().is_file() && rel_path.ends_with(".md") {
                let stat = entry.metadata().ok().map(|meta| NoteStat {
                    size: meta.len(),
                    modified: meta
                        .modified()
                        .map(DateTime::<Utc>::from)
                        .unwrap_or_default(),
                    created: meta.created().ok().map(DateTime::<Utc>::from),
                });
                notes.push(ScanItem {
                    path: rel_path,
                    stat,
                });
            }
        }

        notes.sort_by(|a, b| a.path.cmp(&b.path));
        folders.sort();
        Ok((notes, folders))
    })
    .await
    .map_err(|e| GatewayError::upstream(format!("filesystem scan panicked: {e}")))?
}

fn find_keyword(body: &str, keyword: &str, case_sensitive: bool) -> Option<(usize, usize)> {
    if case_sensitive {
        body.find(keyword).map(|start| (start, start + keyword.len()))
    } else {
        let haystack = body.to_lowercase();
        let needle = keyword.to_lowercase();
        // Positions in the lowercased body; good enough for a context
        // window even when lowercasing shifts byte offsets.
        haystack
            .find(&needle)
            .map(|start| (start, start + needle.len()))
            .map(|(start, end)| clamp_to_boundaries(body, start, end))
    }
}

fn clamp_to_boundaries(body: &str, mut start: usize, mut end: usize) -> (usize, usize) {
    start = start.min(body.len());
    while start > 0 && !body.is_char_boundary(start) {
        start -= 1;
    }
    end = end.min(body.len());
    while end < body.len() && !body.is_char_boundary(end) {
        end += 1;
    }
    (start, end)
}

/// ±`radius` characters of context around a match, cut on char boundaries.
fn context_snippet(body: &str, start: usize, end: usize, radius: usize) -> String {
    let mut lo = start;
    for _ in 0..radius {
        if lo == 0 {
            break;
        }
        lo -= 1;
        while lo > 0 && !body.is_char_boundary(lo) {
            lo -= 1;
        }
    }
    let mut hi = end.min(body.len());
    for _ in 0..radius {
        if hi >= body.len() {
            break;
        }
        hi += 1;
        while hi < body.len() && !body.is_char_boundary(hi) {
            hi += 1;
        }
    }
    body[lo..hi].to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn note(path: &str) -> NoteMetadata {
        NoteMetadata {
            path: path.to_string(),
            name: paths::name_of(path).to_string(),
            size_bytes: 1,
            modified_at: DateTime::<Utc>::default(),
            created_at: None,
            headers: None,
        }
    }

    #[test]
    fn structure_counts_match_lengths() {
        let s = assemble_structure(
            String::new(),
            vec!["a".into(), "a/b".into(), "empty".into()],
            vec![note("a/x.md"), note("a/b/y.md"), note("root.md")],
        );
        assert_eq!(s.total_notes, s.notes.len());
        assert_eq!(s.total_folders, s.folders.len());
        assert_eq!(s.total_notes, 3);
        assert_eq!(s.total_folders, 3);
    }

    #[test]
    fn every_note_parent_is_a_folder_or_root() {
        // "deep/nested" never appears in the scanned folder list.
        let s = assemble_structure(String::new(), vec![], vec![note("deep/nested/z.md")]);
        let folder_paths: Vec<&str> = s.folders.iter().map(|f| f.path.as_str()).collect();
        assert!(folder_paths.contains(&"deep"));
        assert!(folder_paths.contains(&"deep/nested"));
    }

    #[test]
    fn folder_counts_are_direct_children_only() {
        let s = assemble_structure(
            String::new(),
            vec!["a".into(), "a/b".into()],
            vec![note("a/x.md"), note("a/b/y.md"), note("a/b/z.md")],
        );
        let a = s.folders.iter().find(|f| f.path == "a").unwrap();
        assert_eq!(a.notes_count, 1);
        assert_eq!(a.subfolders_count, 1);
        let b = s.folders.iter().find(|f| f.path == "a/b").unwrap();
        assert_eq!(b.notes_count, 2);
        assert_eq!(b.subfolders_count, 0);
        assert_eq!(b.parent.as_deref(), Some("a"));
    }

    #[test]
    fn folder_filter_uses_whole_segments() {
        let notes = vec![note("t/a.md"), note("t2/b.md"), note("t/sub/c.md")];
        let filtered = filter_by_folder(notes, Some("t"));
        let paths: Vec<&str> = filtered.iter().map(|n| n.path.as_str()).collect();
        assert_eq!(paths, vec!["t/a.md", "t/sub/c.md"]);
    }

    #[test]
    fn keyword_match_respects_case_flag() {
        assert!(find_keyword("Hello World", "world", false).is_some());
        assert!(find_keyword("Hello World", "world", true).is_none());
        assert!(find_keyword("Hello World", "World", true).is_some());
    }

    #[test]
    fn snippet_radius_is_in_characters() {
        let body = "x".repeat(300);
        let snippet = context_snippet(&body, 150, 151, 80);
        assert_eq!(snippet.len(), 161);

        // Multi-byte neighbourhood must not split a char.
        let body = "é".repeat(100);
        let (start, end) = find_keyword(&body, "é", true).unwrap();
        let snippet = context_snippet(&body, start, end, 80);
        assert!(snippet.chars().all(|c| c == 'é'));
        assert_eq!(snippet.chars().count(), 81);
    }

    #[tokio::test]
    async fn filesystem_scan_walks_the_vault_root() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path();
        std::fs::create_dir_all(root.join("projects/archive")).unwrap();
        std::fs::create_dir(root.join("empty")).unwrap();
        std::fs::write(root.join("inbox.md"), "# inbox").unwrap();
        let gateway_body = "---\ntype: project\n---\nbody";
        std::fs::write(root.join("projects/gateway.md"), gateway_body).unwrap();
        std::fs::write(root.join("projects/archive/old.md"), "done").unwrap();
        std::fs::write(root.join("projects/readme.txt"), "not a note").unwrap();

        let (items, folders) = scan_filesystem(root.to_path_buf()).await.unwrap();

        let note_paths: Vec<&str> = items.iter().map(|i| i.path.as_str()).collect();
        assert_eq!(
            note_paths,
            vec!["inbox.md", "projects/archive/old.md", "projects/gateway.md"]
        );
        assert_eq!(folders, vec!["empty", "projects", "projects/archive"]);

        // The walk carries each note's stat along, so this branch never has
        // to ask upstream for sizes.
        let gateway_note = items.iter().find(|i| i.path == "projects/gateway.md").unwrap();
        let stat = gateway_note.stat.as_ref().unwrap();
        assert_eq!(stat.size, gateway_body.len() as u64);
        assert!(stat.modified > DateTime::<Utc>::default());
    }

    #[tokio::test]
    async fn discovery_falls_back_to_filesystem_when_upstream_is_down() {
        use crate::cache::VaultCaches;
        use crate::upstream::VaultApi;
        use std::time::Duration;

        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("a.md"), "alpha").unwrap();

        // Nothing listens on this port, so the upstream listing fails and
        // discovery must take the filesystem branch.
        let api = VaultApi::new("http://127.0.0.1:1", "test-key").unwrap();
        let vault = Vault::new(
            api,
            VaultCaches::new(Duration::from_secs(300), Duration::from_secs(180)),
            VaultConfig {
                fs_root: Some(dir.path().to_path_buf()),
                batch_size: 15,
                snippet_radius: 80,
            },
        );

        let notes = vault.discover(false).await.unwrap();
        assert_eq!(notes.len(), 1);
        assert_eq!(notes[0].path, "a.md");
        assert_eq!(notes[0].name, "a.md");
        assert_eq!(notes[0].size_bytes, 5);
        assert_eq!(notes[0].headers, None);
    }
}
