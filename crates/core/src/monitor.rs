//! The monitor loop: parallel head refreshes, pair-wise fork scans, bad
//! block sweeps, and report publication.

use crate::{
    BadBlock, ClientSummary, Metrics, NodeStatus, NodeView, Report, VulnCatalogue, Vulnerability,
    fork,
};
use alloy_primitives::B256;
use chainwatch_store::{HeaderStore, StoreError};
use std::{
    collections::{BTreeMap, BTreeSet, HashMap, HashSet, hash_map::Entry},
    fs, io,
    num::NonZeroUsize,
    path::{Path, PathBuf},
    str::FromStr,
    sync::{
        Arc, Mutex,
        atomic::{AtomicU64, Ordering},
    },
    time::Duration,
};
use tokio::{task::JoinSet, time::Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Minimum interval between bad-block sweeps.
const BAD_BLOCK_SWEEP_INTERVAL: Duration = Duration::from_secs(60);
/// Minimum interval between artifact garbage collections.
const ARTIFACT_CLEAN_INTERVAL: Duration = Duration::from_secs(10 * 60);
/// Display cap on bad blocks carried by a report.
const BAD_BLOCK_DISPLAY_CAP: usize = 20;

/// Drives periodic monitoring rounds over a fleet of nodes.
#[derive(Debug)]
pub struct Monitor {
    nodes: Vec<Arc<NodeView>>,
    store: Arc<dyn HeaderStore>,
    catalogue: Arc<VulnCatalogue>,
    chain_name: String,
    interval: Duration,
    artifact_root: PathBuf,
    /// All bad blocks ever observed, keyed by hash. The key set only grows;
    /// the display cap applies to reports, not to this map.
    bad_blocks: HashMap<B256, BadBlock>,
    /// Previous round's interesting heights, ascending.
    fork_height_cache: Vec<u64>,
    last_clean: Option<Instant>,
    last_bad_blocks: Option<Instant>,
    last_split_size: u64,
    latest_report: Option<Report>,
}

impl Monitor {
    /// Creates a monitor over `nodes`, publishing artifacts under
    /// `artifact_root`.
    pub fn new(
        nodes: Vec<Arc<NodeView>>,
        store: Arc<dyn HeaderStore>,
        catalogue: Arc<VulnCatalogue>,
        chain_name: impl Into<String>,
        interval: Duration,
        artifact_root: impl Into<PathBuf>,
    ) -> io::Result<Self> {
        let artifact_root = artifact_root.into();
        for dir in ["hashes", "badblocks", "vulns"] {
            fs::create_dir_all(artifact_root.join(dir))?;
        }

        let mut nodes = nodes;
        nodes.sort_by(|a, b| a.name().cmp(b.name()));

        Ok(Self {
            nodes,
            store,
            catalogue,
            chain_name: chain_name.into(),
            interval,
            artifact_root,
            bad_blocks: HashMap::new(),
            fork_height_cache: Vec::new(),
            last_clean: None,
            last_bad_blocks: None,
            last_split_size: 0,
            latest_report: None,
        })
    }

    /// The report produced by the most recent round.
    pub const fn latest_report(&self) -> Option<&Report> {
        self.latest_report.as_ref()
    }

    /// Largest split depth observed in the most recent round.
    pub const fn last_split_size(&self) -> u64 {
        self.last_split_size
    }

    /// Runs rounds every `interval` until `cancel` fires. The round in
    /// progress always completes before the loop exits.
    pub async fn run(&mut self, cancel: CancellationToken) -> Result<(), StoreError> {
        info!(
            target: "monitor::round",
            nodes = self.nodes.len(),
            interval = ?self.interval,
            chain = %self.chain_name,
            "Monitor started"
        );
        loop {
            if let Err(err) = self.do_checks().await {
                error!(target: "monitor::round", %err, "Header store is corrupt, aborting");
                return Err(err);
            }
            tokio::select! {
                _ = cancel.cancelled() => {
                    info!(target: "monitor::round", "Monitor stopping");
                    return Ok(());
                }
                _ = tokio::time::sleep(self.interval) => {}
            }
        }
    }

    /// Executes one monitoring round.
    ///
    /// Only an unrecoverable header-store failure is an error; everything
    /// else is bounded to the round and logged.
    pub async fn do_checks(&mut self) -> Result<(), StoreError> {
        let round_start = Instant::now();

        self.refresh_heads().await;

        let mut active = Vec::new();
        for node in &self.nodes {
            if node.status().await == NodeStatus::Ok {
                active.push(node.clone());
            }
        }

        // One representative per distinct head hash; pair scanning cost is
        // quadratic in distinct heads, not in fleet size.
        let mut heights = BTreeSet::new();
        let mut representatives: Vec<Arc<NodeView>> = Vec::new();
        let mut seen_heads: HashSet<B256> = HashSet::new();
        for node in &active {
            if let Some(latest) = node.latest().await {
                heights.insert(latest.number);
                if seen_heads.insert(latest.hash) {
                    representatives.push(node.clone());
                }
            }
        }

        let heights = self.scan_pairs(representatives, heights).await;

        let numbers: Vec<u64> = heights.iter().rev().copied().collect();
        self.fork_height_cache = heights.into_iter().collect();

        let (mut report, matched_vulns) = self.assemble_report(numbers).await;

        let new_bad = self.sweep_bad_blocks(&active).await;
        self.attach_bad_blocks(&mut report);

        self.publish(&report, &matched_vulns, &new_bad)?;
        self.latest_report = Some(report);

        debug!(
            target: "monitor::round",
            elapsed = ?round_start.elapsed(),
            active = active.len(),
            split = self.last_split_size,
            "Round complete"
        );
        Ok(())
    }

    /// Refreshes every node's head in parallel and flips its status.
    async fn refresh_heads(&self) {
        let mut tasks = JoinSet::new();
        for node in &self.nodes {
            let node = node.clone();
            tasks.spawn(async move {
                match node.update_latest().await {
                    Ok(_) => node.set_status(NodeStatus::Ok).await,
                    Err(err) => {
                        warn!(target: "monitor::round", node = node.name(), %err, "Head refresh failed");
                        node.set_status(NodeStatus::Unreachable).await;
                    }
                }
            });
        }
        while tasks.join_next().await.is_some() {}
    }

    /// Scans every unordered pair of representatives for splits, feeding the
    /// shared heights set. Returns the final set.
    async fn scan_pairs(
        &mut self,
        representatives: Vec<Arc<NodeView>>,
        heights: BTreeSet<u64>,
    ) -> BTreeSet<u64> {
        let heights = Arc::new(Mutex::new(heights));
        let split_size = Arc::new(AtomicU64::new(0));
        let cache = Arc::new(self.fork_height_cache.clone());

        let (pair_tx, pair_rx) = async_channel::unbounded::<(Arc<NodeView>, Arc<NodeView>)>();
        let workers = std::thread::available_parallelism().map(NonZeroUsize::get).unwrap_or(4);

        let mut pool = JoinSet::new();
        for _ in 0..workers {
            let pair_rx = pair_rx.clone();
            let heights = heights.clone();
            let split_size = split_size.clone();
            let cache = cache.clone();
            pool.spawn(async move {
                while let Ok((a, b)) = pair_rx.recv().await {
                    let (Some(head_a), Some(head_b)) = (a.head_num().await, b.head_num().await)
                    else {
                        continue;
                    };
                    let highest = head_a.min(head_b);
                    if let Some(split) = fork::find_split(&a, &b, &cache).await {
                        debug!(
                            target: "monitor::fork",
                            a = a.name(),
                            b = b.name(),
                            split,
                            depth = highest - split,
                            "Chain split"
                        );
                        let mut heights = heights.lock().unwrap_or_else(|e| e.into_inner());
                        heights.insert(split);
                        if split > 0 {
                            heights.insert(split - 1);
                        }
                        drop(heights);
                        split_size.fetch_max(highest - split, Ordering::Relaxed);
                    }
                }
            });
        }

        for (i, a) in representatives.iter().enumerate() {
            for b in representatives.iter().skip(i + 1) {
                // Workers only exit on channel close, so sends cannot fail.
                let _ = pair_tx.send((a.clone(), b.clone())).await;
            }
        }
        drop(pair_tx);
        while pool.join_next().await.is_some() {}

        self.last_split_size = split_size.load(Ordering::Relaxed);
        metrics::gauge!(Metrics::CHAIN_SPLIT).set(self.last_split_size as f64);

        Arc::try_unwrap(heights)
            .map(|mutex| mutex.into_inner().unwrap_or_else(|e| e.into_inner()))
            .unwrap_or_default()
    }

    /// Builds the per-node columns and per-height rows.
    async fn assemble_report(
        &self,
        numbers: Vec<u64>,
    ) -> (Report, BTreeMap<String, Vulnerability>) {
        let mut cols = Vec::with_capacity(self.nodes.len());
        let mut matched_vulns = BTreeMap::new();
        for node in &self.nodes {
            let version = node.version().await;
            let vulns = self.catalogue.check(&version).await;
            cols.push(ClientSummary {
                name: node.name().to_string(),
                version,
                status: node.status().await,
                last_progress: node.last_progress().await,
                bad_blocks: node.bad_block_count().await,
                vulnerabilities: vulns.iter().map(|vuln| vuln.uid.clone()).collect(),
            });
            for vuln in vulns {
                matched_vulns.insert(vuln.uid.clone(), vuln);
            }
        }

        let mut rows = BTreeMap::new();
        let mut hashes = Vec::new();
        let mut seen_hashes: HashSet<B256> = HashSet::new();
        for &height in &numbers {
            let mut row = Vec::with_capacity(self.nodes.len());
            for node in &self.nodes {
                let hash = node.hash_at(height, false).await;
                if hash == B256::ZERO {
                    row.push(String::new());
                } else {
                    if seen_hashes.insert(hash) {
                        hashes.push(hash);
                    }
                    row.push(format!("{hash:#x}"));
                }
            }
            rows.insert(height, row);
        }

        let report = Report {
            cols,
            rows,
            numbers,
            hashes,
            bad_blocks: Vec::new(),
            chain: self.chain_name.clone(),
        };
        (report, matched_vulns)
    }

    /// Collects self-reported bad blocks from the active nodes, at most once
    /// per minute. Returns hashes first seen in this sweep.
    async fn sweep_bad_blocks(&mut self, active: &[Arc<NodeView>]) -> Vec<B256> {
        if self.last_bad_blocks.is_some_and(|at| at.elapsed() < BAD_BLOCK_SWEEP_INTERVAL) {
            return Vec::new();
        }
        self.last_bad_blocks = Some(Instant::now());

        let mut new_bad = Vec::new();
        for node in active {
            let reported = match node.bad_blocks().await {
                Ok(reported) => reported,
                Err(err) => {
                    debug!(target: "monitor::round", node = node.name(), %err, "Bad block sweep failed");
                    continue;
                }
            };
            node.set_bad_block_count(reported.len()).await;
            for args in &reported {
                match self.bad_blocks.entry(args.hash) {
                    Entry::Occupied(mut entry) => entry.get_mut().add_client(node.name()),
                    Entry::Vacant(entry) => match BadBlock::from_args(args, node.name()) {
                        Ok(bad) => {
                            info!(
                                target: "monitor::round",
                                node = node.name(),
                                hash = %args.hash,
                                number = %bad.number,
                                "New bad block"
                            );
                            entry.insert(bad);
                            new_bad.push(args.hash);
                        }
                        Err(err) => {
                            warn!(target: "monitor::round", node = node.name(), hash = %args.hash, %err, "Undecodable bad block");
                        }
                    },
                }
            }
        }
        new_bad
    }

    /// Attaches the newest bad blocks to the report and refreshes the gauge.
    fn attach_bad_blocks(&self, report: &mut Report) {
        let mut all: Vec<&BadBlock> = self.bad_blocks.values().collect();
        all.sort_by(|a, b| b.number.cmp(&a.number));
        if let Some(newest) = all.first() {
            let number = u64::try_from(newest.number).unwrap_or(u64::MAX);
            metrics::gauge!(Metrics::CHAIN_BAD_BLOCK).set(number as f64);
        }
        report.bad_blocks = all.into_iter().take(BAD_BLOCK_DISPLAY_CAP).cloned().collect();
    }

    /// Writes the round's artifacts. Only fatal store corruption propagates;
    /// plain write failures are logged and retried next round.
    fn publish(
        &mut self,
        report: &Report,
        matched_vulns: &BTreeMap<String, Vulnerability>,
        new_bad: &[B256],
    ) -> Result<(), StoreError> {
        self.write_data_json(report);
        self.write_headers(report)?;
        self.write_bad_blocks(new_bad);
        self.write_vulns(matched_vulns);
        self.clean_stale_hashes(report);
        Ok(())
    }

    /// `data.json`, replaced atomically via write-then-rename.
    fn write_data_json(&self, report: &Report) {
        let path = self.artifact_root.join("data.json");
        let tmp = self.artifact_root.join("data.json.tmp");
        let result = serde_json::to_vec_pretty(report)
            .map_err(io::Error::other)
            .and_then(|bytes| fs::write(&tmp, bytes))
            .and_then(|()| fs::rename(&tmp, &path));
        if let Err(err) = result {
            warn!(target: "monitor::round", path = %path.display(), %err, "Failed to write report");
        }
    }

    /// One file per previously-unseen referenced header.
    fn write_headers(&self, report: &Report) -> Result<(), StoreError> {
        for hash in &report.hashes {
            let path = self.artifact_root.join("hashes").join(format!("{hash:#x}.json"));
            if path.exists() {
                continue;
            }
            let header = match self.store.get(*hash) {
                Ok(Some(header)) => header,
                Ok(None) => continue,
                Err(err) if err.is_fatal() => return Err(err),
                Err(err) => {
                    warn!(target: "monitor::round", %hash, %err, "Header store read failed");
                    continue;
                }
            };
            write_json(&path, &header);
        }
        Ok(())
    }

    /// One file per newly-discovered bad block: the stored header when the
    /// hash is resolvable, a minimal record otherwise.
    fn write_bad_blocks(&self, new_bad: &[B256]) {
        for hash in new_bad {
            let Some(bad) = self.bad_blocks.get(hash) else { continue };
            let path = self.artifact_root.join("badblocks").join(format!("{hash:#x}.json"));
            match self.store.get(*hash) {
                Ok(Some(header)) => write_json(
                    &path,
                    &serde_json::json!({
                        "header": header,
                        "clients": bad.clients,
                        "hash": bad.hash,
                        "rlp": bad.rlp,
                    }),
                ),
                _ => write_json(
                    &path,
                    &serde_json::json!({
                        "clients": bad.clients,
                        "hash": bad.hash,
                        "rlp": bad.rlp,
                    }),
                ),
            }
        }
    }

    /// One file per newly-matched vulnerability entry.
    fn write_vulns(&self, matched_vulns: &BTreeMap<String, Vulnerability>) {
        for (uid, vuln) in matched_vulns {
            let path = self.artifact_root.join("vulns").join(format!("{uid}.json"));
            if !path.exists() {
                write_json(&path, vuln);
            }
        }
    }

    /// Every ten minutes, drops header files no longer referenced by the
    /// current report.
    fn clean_stale_hashes(&mut self, report: &Report) {
        if self.last_clean.is_some_and(|at| at.elapsed() < ARTIFACT_CLEAN_INTERVAL) {
            return;
        }
        self.last_clean = Some(Instant::now());

        let live: HashSet<B256> = report.hashes.iter().copied().collect();
        let dir = self.artifact_root.join("hashes");
        let entries = match fs::read_dir(&dir) {
            Ok(entries) => entries,
            Err(err) => {
                warn!(target: "monitor::round", dir = %dir.display(), %err, "Artifact scan failed");
                return;
            }
        };
        for entry in entries.flatten() {
            let path = entry.path();
            let Some(stem) = path.file_stem().and_then(|stem| stem.to_str()) else { continue };
            let Ok(hash) = B256::from_str(stem) else { continue };
            if !live.contains(&hash) {
                debug!(target: "monitor::round", %hash, "Dropping stale header artifact");
                if let Err(err) = fs::remove_file(&path) {
                    warn!(target: "monitor::round", path = %path.display(), %err, "Artifact removal failed");
                }
            }
        }
    }
}

fn write_json<T: serde::Serialize>(path: &Path, value: &T) {
    let result = serde_json::to_vec_pretty(value)
        .map_err(io::Error::other)
        .and_then(|bytes| fs::write(path, bytes));
    if let Err(err) = result {
        warn!(target: "monitor::round", path = %path.display(), %err, "Artifact write failed");
    }
}
