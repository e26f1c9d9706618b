//! Parse stage: format detection, payload extraction, validation and checksum.

use std::sync::Arc;
use std::time::Instant;

use tracing::{debug, info};

use super::frame::PooledFrame;
use super::queue::{QueueConsumer, QueueProducer};
use super::worker::{IdleBackoff, StageContext};
use crate::accel;
use crate::extract::extract_in_place;
use crate::format;

/// What happened to one frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ParseOutcome {
    Valid,
    Malformed,
    Invalid,
}

pub(crate) struct ParseWorker {
    pub lane: usize,
    /// Parse queues of the channels routed to this lane.
    pub inputs: Vec<QueueConsumer<PooledFrame>>,
    pub output: QueueProducer<PooledFrame>,
    pub ctx: Arc<StageContext>,
    pub keep_original: bool,
}

impl ParseWorker {
    pub fn run(mut self) {
        info!("Parse worker {} started with {} inputs", self.lane, self.inputs.len());
        let mut backoff = IdleBackoff::new(self.ctx.idle_wait);

        while !self.ctx.should_stop() {
            let mut worked = false;
            for i in 0..self.inputs.len() {
                let Some(mut frame) = self.inputs[i].try_pop() else {
                    continue;
                };
                worked = true;
                let started = Instant::now();
                if parse_frame(&mut frame, &self.ctx, self.keep_original) == ParseOutcome::Valid {
                    self.ctx.push_with_retry(&mut self.output, frame);
                }
                self.ctx.stats.record_busy(started.elapsed());
                self.ctx.throttle_pause();
            }

            if worked {
                backoff.reset();
            } else {
                backoff.idle();
            }
        }
        debug!("Parse worker {} stopped", self.lane);
    }
}

/// Turn the raw bytes of `frame` into a validated nucleotide payload.
///
/// On success the payload sits at the front of the buffer and the frame
/// carries its format, header and checksum. Failures are counted here.
pub(crate) fn parse_frame(
    frame: &mut PooledFrame,
    ctx: &StageContext,
    keep_original: bool,
) -> ParseOutcome {
    let detected = format::detect(frame.bytes());
    frame.format = detected;
    if keep_original {
        frame.original = Some(frame.bytes().to_vec());
    }

    let len = frame.len();
    let extracted = match extract_in_place(&mut frame.buffer_mut()[..], len, detected) {
        Ok(extracted) => extracted,
        Err(e) => {
            ctx.stats.record_parsing_error();
            debug!("Discarding {} frame: {}", detected, e);
            return ParseOutcome::Malformed;
        }
    };
    frame.set_len(extracted.len);
    frame.header = extracted.header.map(Box::new);

    if !accel::validate(frame.bytes()) {
        ctx.stats.record_validation_error();
        debug!("Discarding {} frame with non-nucleotide bytes", detected);
        return ParseOutcome::Invalid;
    }

    frame.checksum = Some(accel::checksum(frame.bytes()));
    ctx.stats.record_parsed();
    ParseOutcome::Valid
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::frame::FramePool;
    use crate::platform::ThermalState;
    use crate::stats::PipelineStats;
    use crate::types::SourceFormat;
    use std::sync::atomic::AtomicBool;
    use std::time::Duration;

    fn context() -> StageContext {
        StageContext {
            stop: Arc::new(AtomicBool::new(false)),
            stats: Arc::new(PipelineStats::new()),
            thermal: Arc::new(ThermalState::default()),
            throttle_stages: false,
            idle_wait: Duration::from_micros(10),
            output_retry_attempts: 0,
        }
    }

    #[test]
    fn test_fasta_frame_is_compacted_and_checksummed() {
        let ctx = context();
        let pool = FramePool::new(1, 0);
        let mut frame = pool.acquire();
        frame.fill_from(b">seq1 test\nATCG\nATCG\n");

        assert_eq!(parse_frame(&mut frame, &ctx, true), ParseOutcome::Valid);
        assert_eq!(frame.bytes(), b"ATCGATCG");
        assert_eq!(frame.format, SourceFormat::Fasta);
        assert_eq!(frame.header.as_ref().unwrap().id.as_str(), "seq1");
        assert_eq!(frame.checksum, Some(accel::checksum(b"ATCGATCG")));
        assert_eq!(frame.original.as_deref(), Some(&b">seq1 test\nATCG\nATCG\n"[..]));
        assert_eq!(ctx.stats.snapshot().frames_parsed, 1);
    }

    #[test]
    fn test_invalid_symbols_count_once() {
        let ctx = context();
        let pool = FramePool::new(1, 0);
        let mut frame = pool.acquire();
        frame.fill_from(b">seq1\nATXG\n");

        assert_eq!(parse_frame(&mut frame, &ctx, false), ParseOutcome::Invalid);
        let snap = ctx.stats.snapshot();
        assert_eq!(snap.validation_errors, 1);
        assert_eq!(snap.parsing_errors, 0);
        assert_eq!(snap.frames_parsed, 0);
        assert!(frame.original.is_none());
    }

    #[test]
    fn test_malformed_container_counts_parsing_error() {
        let ctx = context();
        let pool = FramePool::new(1, 0);
        let mut frame = pool.acquire();
        frame.fill_from(b">only a header\n");

        assert_eq!(parse_frame(&mut frame, &ctx, false), ParseOutcome::Malformed);
        let snap = ctx.stats.snapshot();
        assert_eq!(snap.parsing_errors, 1);
        assert_eq!(snap.validation_errors, 0);
    }

    #[test]
    fn test_worker_drains_every_input() {
        use crate::pipeline::queue::PipelineQueue;

        let ctx = Arc::new(context());
        let pool = FramePool::new(4, 0);
        let (mut in_a, rx_a) = PipelineQueue::with_capacity(4).unwrap();
        let (mut in_b, rx_b) = PipelineQueue::with_capacity(4).unwrap();
        let (tx_out, mut out) = PipelineQueue::with_capacity(8).unwrap();

        for (queue, text) in [(&mut in_a, &b"ACGT"[..]), (&mut in_b, &b"@r\nTTTT\n+\nIIII\n"[..])] {
            let mut frame = pool.acquire();
            frame.fill_from(text);
            assert!(queue.try_push(frame).is_ok());
        }

        let worker = ParseWorker {
            lane: 0,
            inputs: vec![rx_a, rx_b],
            output: tx_out,
            ctx: Arc::clone(&ctx),
            keep_original: false,
        };
        let handle = std::thread::spawn(move || worker.run());

        let deadline = Instant::now() + Duration::from_secs(5);
        let mut seen = Vec::new();
        while seen.len() < 2 && Instant::now() < deadline {
            match out.try_pop() {
                Some(frame) => seen.push(frame.bytes().to_vec()),
                None => std::thread::sleep(Duration::from_millis(1)),
            }
        }
        ctx.stop.store(true, std::sync::atomic::Ordering::Release);
        handle.join().unwrap();

        seen.sort();
        assert_eq!(seen, vec![b"ACGT".to_vec(), b"TTTT".to_vec()]);
    }
}
