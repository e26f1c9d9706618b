//! Encode stage: in-place 2-bit packing and metadata construction.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

use sha2::{Digest as _, Sha256};
use tracing::{debug, info};
use uuid::Uuid;

use super::frame::PooledFrame;
use super::queue::{QueueConsumer, QueueProducer};
use super::worker::{IdleBackoff, StageContext};
use crate::accel;
use crate::codec;
use crate::types::{unix_millis, Description, Digest, SequenceId, SequenceMetadata};

pub(crate) struct EncodeWorker {
    pub lane: usize,
    pub input: QueueConsumer<PooledFrame>,
    pub output: QueueProducer<PooledFrame>,
    pub ctx: Arc<StageContext>,
    /// Shared by all lanes of a run.
    pub sequence_counter: Arc<AtomicU64>,
    pub compute_digest: bool,
}

impl EncodeWorker {
    pub fn run(mut self) {
        info!("Encode worker {} started", self.lane);
        let mut backoff = IdleBackoff::new(self.ctx.idle_wait);

        while !self.ctx.should_stop() {
            let Some(mut frame) = self.input.try_pop() else {
                backoff.idle();
                continue;
            };
            backoff.reset();

            let started = Instant::now();
            let sequence_number = self.sequence_counter.fetch_add(1, Ordering::Relaxed) + 1;
            encode_frame(&mut frame, sequence_number, self.compute_digest);
            self.ctx.stats.record_encoded(frame.len());
            self.ctx.push_with_retry(&mut self.output, frame);
            self.ctx.stats.record_busy(started.elapsed());
            self.ctx.throttle_pause();
        }
        debug!("Encode worker {} stopped", self.lane);
    }
}

/// Pack the validated payload of `frame` and attach its metadata.
pub(crate) fn encode_frame(frame: &mut PooledFrame, sequence_number: u64, compute_digest: bool) {
    let symbols = frame.len();
    let crc32 = frame
        .checksum
        .unwrap_or_else(|| accel::checksum(frame.bytes()));
    let sha256 = compute_digest.then(|| Digest(Sha256::digest(frame.bytes()).into()));

    let packed = codec::pack_in_place(&mut frame.buffer_mut()[..], symbols);
    frame.set_len(packed);

    let (sequence_id, description) = match frame.header.take() {
        Some(header) => {
            let header = *header;
            (header.id, header.description)
        }
        None => (
            SequenceId::new(&Uuid::new_v4().to_string()),
            Description::default(),
        ),
    };

    frame.metadata = Some(Box::new(SequenceMetadata {
        sequence_number,
        sequence_id,
        description,
        source_format: frame.format,
        original_length: symbols as u64,
        encoded_length: packed as u64,
        timestamp: unix_millis(),
        crc32,
        sha256,
    }));
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::frame::FramePool;
    use crate::types::{SequenceHeader, SourceFormat};

    #[test]
    fn test_packs_and_describes() {
        let pool = FramePool::new(1, 0);
        let mut frame = pool.acquire();
        frame.fill_from(b"ATCGATCG");
        frame.format = SourceFormat::Fasta;
        frame.checksum = Some(accel::checksum(b"ATCGATCG"));
        frame.header = Some(Box::new(SequenceHeader::from_line("seq1 test")));

        encode_frame(&mut frame, 7, false);
        assert_eq!(frame.bytes(), &[0x1E, 0x1E]);
        assert!(frame.header.is_none());

        let meta = frame.metadata.as_ref().unwrap();
        assert_eq!(meta.sequence_number, 7);
        assert_eq!(meta.sequence_id.as_str(), "seq1");
        assert_eq!(meta.description.as_str(), "test");
        assert_eq!(meta.original_length, 8);
        assert_eq!(meta.encoded_length, 2);
        assert_eq!(meta.crc32, accel::checksum(b"ATCGATCG"));
        assert!(meta.sha256.is_none());
        assert!(meta.timestamp > 0);
    }

    #[test]
    fn test_generated_id_and_digest() {
        let pool = FramePool::new(1, 0);
        let mut frame = pool.acquire();
        frame.fill_from(b"ACGTA");

        encode_frame(&mut frame, 1, true);
        assert_eq!(frame.len(), 2);

        let meta = frame.metadata.as_ref().unwrap();
        assert!(Uuid::parse_str(meta.sequence_id.as_str()).is_ok());
        // Checksum is computed when Parse did not provide one
        assert_eq!(meta.crc32, accel::checksum(b"ACGTA"));
        let expected: [u8; 32] = Sha256::digest(b"ACGTA").into();
        assert_eq!(meta.sha256, Some(Digest(expected)));
    }
}
