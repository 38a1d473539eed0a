use crossbeam_channel::{Sender, TrySendError};
use std::sync::{
    atomic::{AtomicUsize, Ordering},
    Arc,
};

/// Downmix multi-channel input to mono while applying the provided converter
/// so every block reaching the consumer is single-channel f32.
pub(super) fn append_downmixed_samples<T, F>(
    buf: &mut Vec<f32>,
    data: &[T],
    channels: usize,
    mut convert: F,
) where
    T: Copy,
    F: FnMut(T) -> f32,
{
    if channels <= 1 {
        buf.extend(data.iter().copied().map(&mut convert));
        return;
    }

    // Average each interleaved frame to produce a mono representation.
    let mut acc = 0.0f32;
    let mut count = 0usize;
    for sample in data.iter().copied() {
        acc += convert(sample);
        count += 1;
        if count == channels {
            buf.push(acc / channels as f32);
            acc = 0.0;
            count = 0;
        }
    }
    if count > 0 {
        buf.push(acc / count as f32);
    }
}

/// Forwards each callback block to the consumer thread. The callback must
/// never park, so a full queue drops the incoming block and counts it.
pub(super) struct BlockDispatcher {
    sender: Sender<Vec<f32>>,
    dropped: Arc<AtomicUsize>,
}

impl BlockDispatcher {
    pub(super) fn new(sender: Sender<Vec<f32>>, dropped: Arc<AtomicUsize>) -> Self {
        Self { sender, dropped }
    }

    pub(super) fn push<T, F>(&self, data: &[T], channels: usize, convert: F)
    where
        T: Copy,
        F: FnMut(T) -> f32,
    {
        let channels = channels.max(1);
        let mut block = Vec::with_capacity(data.len() / channels + 1);
        append_downmixed_samples(&mut block, data, channels, convert);
        if block.is_empty() {
            return;
        }
        match self.sender.try_send(block) {
            Ok(()) => {}
            Err(TrySendError::Full(_)) => {
                self.dropped.fetch_add(1, Ordering::Relaxed);
            }
            Err(TrySendError::Disconnected(_)) => {}
        }
    }
}
