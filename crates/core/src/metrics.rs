//! Metric names and registration.

/// Container for the monitor's metric identifiers.
#[derive(Debug)]
pub struct Metrics;

impl Metrics {
    /// Latest block number per node.
    /// Labels: `node`
    pub const NODE_HEAD: &'static str = "chainwatch_node_head";

    /// Largest split depth observed in the most recent round.
    pub const CHAIN_SPLIT: &'static str = "chainwatch_chain_split";

    /// Block number of the most recently observed bad block.
    pub const CHAIN_BAD_BLOCK: &'static str = "chainwatch_chain_bad_block";

    /// Header fetches issued to a node.
    /// Labels: `node`
    pub const NODE_FETCHES_TOTAL: &'static str = "chainwatch_node_fetch_total";

    /// Header fetches that failed.
    /// Labels: `node`
    pub const NODE_FETCH_ERRORS_TOTAL: &'static str = "chainwatch_node_fetch_error_total";

    /// Reorged-out entries evicted from a node's chain view.
    /// Labels: `node`
    pub const NODE_REORGS_TOTAL: &'static str = "chainwatch_node_reorg_total";

    /// Describes all metrics and zeroes the per-node series.
    pub fn init<'a>(nodes: impl IntoIterator<Item = &'a str>) {
        Self::describe();
        for node in nodes {
            Self::zero(node);
        }
        metrics::gauge!(Self::CHAIN_SPLIT).set(0.0);
        metrics::gauge!(Self::CHAIN_BAD_BLOCK).set(0.0);
    }

    fn describe() {
        metrics::describe_gauge!(Self::NODE_HEAD, "Latest block number advertised per node");
        metrics::describe_gauge!(
            Self::CHAIN_SPLIT,
            "Largest split depth observed in the most recent round"
        );
        metrics::describe_gauge!(
            Self::CHAIN_BAD_BLOCK,
            "Block number of the most recently observed bad block"
        );
        metrics::describe_counter!(
            Self::NODE_FETCHES_TOTAL,
            metrics::Unit::Count,
            "Total header fetches issued per node"
        );
        metrics::describe_counter!(
            Self::NODE_FETCH_ERRORS_TOTAL,
            metrics::Unit::Count,
            "Total failed header fetches per node"
        );
        metrics::describe_counter!(
            Self::NODE_REORGS_TOTAL,
            metrics::Unit::Count,
            "Total chain view entries evicted by reorg repair per node"
        );
    }

    fn zero(node: &str) {
        metrics::gauge!(Self::NODE_HEAD, "node" => node.to_string()).set(0.0);
        metrics::counter!(Self::NODE_FETCHES_TOTAL, "node" => node.to_string()).increment(0);
        metrics::counter!(Self::NODE_FETCH_ERRORS_TOTAL, "node" => node.to_string()).increment(0);
        metrics::counter!(Self::NODE_REORGS_TOTAL, "node" => node.to_string()).increment(0);
    }
}
