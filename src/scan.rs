use crate::{
    error::WalletError,
    provider::ChainProvider,
    types::BlockRange,
};
use alloy_rpc_types_eth::{Filter, Log};
use tracing::{debug, error, warn};

/// Outcome of a chunked log scan. `logs` are in block order; `skipped` lists
/// any sub-ranges abandoned after back-off, which is a flagged data-loss path.
#[derive(Debug, Default)]
pub struct LogScan {
    pub logs: Vec<Log>,
    pub skipped: Vec<BlockRange>,
}

impl LogScan {
    #[must_use]
    pub const fn is_complete(&self) -> bool {
        self.skipped.is_empty()
    }
}

/// Fetches logs for `filter` over `range`, adapting to the node's undocumented
/// cap on blocks scanned per call.
///
/// Chunks are fetched strictly left to right and sequentially, so the result
/// needs no further sorting and retry state stays simple. The step never grows
/// after a success. A range-too-large rejection that carries a node-suggested
/// window is honored by descending into the intersection of the suggestion and
/// the blocks still owed, with a smaller step derived from the suggested span;
/// a rejection without a usable suggestion halves the step and retries the same
/// starting block. When the step cannot shrink further the offending chunk is
/// logged and skipped so the scan always terminates. Any other error aborts the
/// scan for this filter; partial results are kept.
pub async fn fetch_logs_in_range<P: ChainProvider>(
    provider: &P,
    filter: &Filter,
    range: BlockRange,
    initial_step: u64,
) -> LogScan {
    let mut scan = LogScan::default();
    if range.from > range.to || initial_step == 0 {
        return scan;
    }

    // Pending segments, LIFO: node-suggested sub-ranges are pushed on top of
    // the remainder so blocks are still visited strictly left to right.
    let mut segments = vec![(range, initial_step)];

    while let Some((segment, mut step)) = segments.pop() {
        let mut current = segment.from;

        'segment: while current <= segment.to {
            let chunk = BlockRange::new(current, (current + step - 1).min(segment.to));
            let chunk_filter = filter.clone().from_block(chunk.from).to_block(chunk.to);

            match provider.get_logs(&chunk_filter).await {
                Ok(mut logs) => {
                    debug!("fetched {} logs in {chunk}", logs.len());
                    scan.logs.append(&mut logs);
                    current = chunk.to + 1;
                }
                Err(WalletError::RangeTooLarge { suggested }) => {
                    let remaining = BlockRange::new(current, segment.to);
                    if let Some(sub) = suggested.and_then(|s| s.intersect(remaining)) {
                        debug!("node suggested {sub} for rejected chunk {chunk}");
                        if sub.to < segment.to {
                            segments.push((BlockRange::new(sub.to + 1, segment.to), step));
                        }
                        segments.push((sub, (sub.width() / 10).max(1)));
                        break 'segment;
                    }
                    if step > 1 {
                        step /= 2;
                        debug!("chunk {chunk} rejected, halving step to {step}");
                    } else {
                        error!("range {chunk} unscannable after back-off, skipping forward");
                        scan.skipped.push(chunk);
                        current = chunk.to + 1;
                    }
                }
                Err(err) => {
                    warn!("aborting log scan at block {current}: {err}");
                    return scan;
                }
            }
        }
    }

    scan
}
