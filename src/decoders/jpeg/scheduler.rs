use std::mem;
use std::panic;
use std::sync::mpsc::{self, Receiver, Sender};
use std::thread::{self, JoinHandle};

use crate::decoders::jpeg::component::ImageComponent;
use crate::decoders::jpeg::idct::reconstruct_row;
use crate::utils::error::{VexelError, VexelResult};
use crate::{log_debug, log_error};

/// Block rows handed from the decode thread to a channel worker.
///
/// Sending a batch is the publication of the channel's new watermark: everything the
/// decode thread wrote into these rows happens-before the worker reads them.
#[derive(Debug)]
struct RowBatch {
    first_row: usize,
    rows: Vec<Vec<i32>>,
    watermark: usize,
}

#[derive(Debug)]
struct ChannelWorker {
    sender: Sender<RowBatch>,
    handle: JoinHandle<Vec<u8>>,
}

/// Lets reconstruction of a channel trail its entropy decoding.
///
/// For every channel the decode thread keeps a watermark: the number of block rows it
/// has finished with for good. Rows below the watermark belong to that channel's
/// worker, rows above it are never touched by the worker. Workers start lazily, the
/// first time a channel has complete spectral coverage.
#[derive(Debug)]
pub struct ScanScheduler {
    enabled: bool,
    workers: Vec<Option<ChannelWorker>>,
    watermarks: Vec<usize>,
}

impl ScanScheduler {
    pub fn new(channels: usize, enabled: bool) -> Self {
        ScanScheduler {
            enabled,
            workers: (0..channels).map(|_| None).collect(),
            watermarks: vec![0; channels],
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Stops new workers from being spawned. Workers already running keep receiving
    /// rows of their own channel.
    pub fn disable(&mut self) {
        self.enabled = false;
    }

    pub fn watermark(&self, channel: usize) -> usize {
        self.watermarks[channel]
    }

    pub fn has_worker(&self, channel: usize) -> bool {
        self.workers[channel].is_some()
    }

    /// Hands block rows `watermark..upto` of a fully covered channel to its worker.
    ///
    /// Does nothing when the channel has no worker and splitting is disabled; those rows
    /// stay in the component for [`ScanScheduler::finish`] to reconstruct.
    pub fn publish(&mut self, channel: usize, component: &mut ImageComponent, upto: usize) -> VexelResult<()> {
        let upto = upto.min(component.block_rows);
        let watermark = self.watermarks[channel];

        if upto <= watermark {
            return Ok(());
        }

        if self.workers[channel].is_none() {
            if !self.enabled {
                return Ok(());
            }
            self.workers[channel] = Some(Self::spawn(channel, component)?);
        }

        let rows = component.rows[watermark..upto].iter_mut().map(mem::take).collect();
        let batch = RowBatch {
            first_row: watermark,
            rows,
            watermark: upto,
        };

        if let Some(worker) = &self.workers[channel] {
            if worker.sender.send(batch).is_err() {
                // The worker is gone; joining it in `finish` reports why.
                log_error!("Reconstruction worker for channel {} stopped early", channel);
            }
        }

        self.watermarks[channel] = upto;

        Ok(())
    }

    fn spawn(channel: usize, component: &ImageComponent) -> VexelResult<ChannelWorker> {
        let quantization = component
            .quantization
            .ok_or_else(|| VexelError::corrupt(format!("No quantization table latched for component {}", component.id)))?;
        let stride = component.row_stride();
        let block_rows = component.block_rows;
        let (sender, receiver) = mpsc::channel::<RowBatch>();

        log_debug!("Spawning reconstruction worker for channel {}", channel);

        let handle = thread::Builder::new()
            .name(format!("vexel-jpeg-channel-{}", channel))
            .spawn(move || Self::run_worker(receiver, quantization, stride, block_rows))?;

        Ok(ChannelWorker { sender, handle })
    }

    fn run_worker(receiver: Receiver<RowBatch>, quantization: [u16; 64], stride: usize, block_rows: usize) -> Vec<u8> {
        let mut samples = vec![0u8; stride * block_rows];
        let mut seen = 0;

        for batch in receiver {
            debug_assert_eq!(batch.first_row, seen);

            for (i, row) in batch.rows.iter().enumerate() {
                let start = (batch.first_row + i) * stride;
                reconstruct_row(row, &quantization, &mut samples[start..start + stride]);
            }

            seen = batch.watermark;
        }

        samples
    }

    /// Publishes what is left of every channel that has a worker, joins all workers and
    /// reconstructs the remaining channels on the calling thread.
    ///
    /// # Returns
    /// - One block-ordered sample buffer per component
    pub fn finish(mut self, components: &mut [ImageComponent]) -> VexelResult<Vec<Vec<u8>>> {
        for (channel, component) in components.iter_mut().enumerate() {
            if self.has_worker(channel) {
                let rows = component.block_rows;
                self.publish(channel, component, rows)?;
            }
        }

        let mut planes = Vec::with_capacity(components.len());

        for (channel, component) in components.iter_mut().enumerate() {
            let samples = match self.workers[channel].take() {
                Some(worker) => {
                    drop(worker.sender);
                    match worker.handle.join() {
                        Ok(samples) => samples,
                        Err(payload) => panic::resume_unwind(payload),
                    }
                }
                None => Self::reconstruct_inline(component)?,
            };

            component.rows = Vec::new();
            planes.push(samples);
        }

        Ok(planes)
    }

    fn reconstruct_inline(component: &ImageComponent) -> VexelResult<Vec<u8>> {
        let quantization = component.quantization.ok_or_else(|| {
            VexelError::corrupt(format!("Component {} was never part of a scan", component.id))
        })?;

        let stride = component.row_stride();
        let mut samples = vec![0u8; stride * component.block_rows];

        for (row, output) in component.rows.iter().zip(samples.chunks_exact_mut(stride)) {
            reconstruct_row(row, &quantization, output);
        }

        Ok(samples)
    }
}
