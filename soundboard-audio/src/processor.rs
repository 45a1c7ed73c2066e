//! Capture/render loop - owns the device session and drives the pipeline
//!
//! ```text
//! capture packet → decode → per-channel queues → block → mix to mono → FFT
//!     → peak report → spectral hook → IFFT → mix to output layout → encode → render
//! ```
//!
//! [`AudioProcessor`] is the controlling-thread handle. While capturing, the
//! capture and render clients live on a dedicated worker thread together
//! with all queues and block buffers; the only shared state is the
//! cancellation flag, the pitch scale and the peak report outlets.

use crate::channel::{Channel, ChannelQueues};
use crate::codec::{FrameReader, FrameWriter, Sample};
use crate::config::ProcessorConfig;
use crate::device::{BufferFlags, CaptureClient, InputEndpoint, OutputEndpoint, RenderClient, StreamControl};
use crate::error::{AudioError, AudioResult};
use crate::format::StreamFormat;
use crate::mixer::{mix_down, modify_channels};
use crate::spectral::{PassThrough, PitchScale, SpectralProcessor};
use crossbeam_channel::{bounded, Receiver, Sender, TrySendError};
use parking_lot::Mutex;
use soundboard_analysis::{Complex, PeakDetector, PeakReport, TransformEngine};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

/// Processor lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessorState {
    Idle,
    Capturing,
}

impl ProcessorState {
    fn name(self) -> &'static str {
        match self {
            ProcessorState::Idle => "idle",
            ProcessorState::Capturing => "capturing",
        }
    }
}

/// Events sent from the capture worker
#[derive(Debug, Clone)]
pub enum ProcessorEvent {
    /// Peaks of one processed block
    Peaks(PeakReport),
    /// Worker exited; carries the fatal error if there was one
    Stopped { error: Option<String> },
}

struct InputSide {
    name: String,
    control: Box<dyn StreamControl>,
    /// Moved onto the worker while capturing
    client: Option<Box<dyn CaptureClient>>,
}

struct OutputSide {
    name: String,
    control: Box<dyn StreamControl>,
    client: Option<Box<dyn RenderClient>>,
}

/// What the worker hands back when it exits
struct WorkerExit {
    capture: Box<dyn CaptureClient>,
    render: Box<dyn RenderClient>,
    spectral: Box<dyn SpectralProcessor>,
    result: AudioResult<()>,
}

/// Handle to the capture/render pipeline
///
/// Lifecycle methods take `&mut self`, so configuration, `start` and `stop`
/// cannot race each other.
pub struct AudioProcessor {
    config: ProcessorConfig,
    input: Option<InputSide>,
    output: Option<OutputSide>,
    spectral: Option<Box<dyn SpectralProcessor>>,
    worker: Option<JoinHandle<WorkerExit>>,
    cancel: Arc<AtomicBool>,
    pitch: PitchScale,
    event_tx: Sender<ProcessorEvent>,
    event_rx: Receiver<ProcessorEvent>,
    latest: Arc<Mutex<Option<PeakReport>>>,
    blocks_processed: Arc<AtomicU64>,
    events_dropped: Arc<AtomicU64>,
}

impl Default for AudioProcessor {
    fn default() -> Self {
        Self::new(ProcessorConfig::default())
    }
}

impl AudioProcessor {
    pub fn new(config: ProcessorConfig) -> Self {
        let (event_tx, event_rx) = bounded(config.event_capacity.max(1));
        Self {
            config,
            input: None,
            output: None,
            spectral: Some(Box::new(PassThrough)),
            worker: None,
            cancel: Arc::new(AtomicBool::new(false)),
            pitch: PitchScale::default(),
            event_tx,
            event_rx,
            latest: Arc::new(Mutex::new(None)),
            blocks_processed: Arc::new(AtomicU64::new(0)),
            events_dropped: Arc::new(AtomicU64::new(0)),
        }
    }

    pub fn state(&self) -> ProcessorState {
        if self.worker.is_some() {
            ProcessorState::Capturing
        } else {
            ProcessorState::Idle
        }
    }

    fn require(&self, state: ProcessorState, op: &'static str) -> AudioResult<()> {
        let current = self.state();
        if current != state {
            return Err(AudioError::InvalidState {
                op,
                state: current.name(),
            });
        }
        Ok(())
    }

    pub fn config(&self) -> &ProcessorConfig {
        &self.config
    }

    /// Replace the configuration; only while idle
    pub fn set_config(&mut self, config: ProcessorConfig) -> AudioResult<()> {
        self.require(ProcessorState::Idle, "change configuration")?;
        config.validate()?;
        if config.event_capacity != self.config.event_capacity {
            let (event_tx, event_rx) = bounded(config.event_capacity.max(1));
            self.event_tx = event_tx;
            self.event_rx = event_rx;
        }
        self.config = config;
        Ok(())
    }

    /// Use a capture device; its negotiated format must be 32-bit IEEE float
    pub fn configure_input(&mut self, endpoint: InputEndpoint) -> AudioResult<()> {
        self.require(ProcessorState::Idle, "configure input")?;
        let format = endpoint.client.format();
        if !format.is_supported() {
            return Err(AudioError::UnsupportedCaptureFormat(format.to_string()));
        }
        tracing::info!(
            device = %endpoint.name,
            buffer_frames = endpoint.client.buffer_frames(),
            frame_size = format.frame_size(),
            %format,
            "input configured"
        );
        self.input = Some(InputSide {
            name: endpoint.name,
            control: endpoint.control,
            client: Some(endpoint.client),
        });
        Ok(())
    }

    /// Use a render device; its negotiated format must be 32-bit IEEE float
    pub fn configure_output(&mut self, endpoint: OutputEndpoint) -> AudioResult<()> {
        self.require(ProcessorState::Idle, "configure output")?;
        let format = endpoint.client.format();
        if !format.is_supported() {
            return Err(AudioError::UnsupportedRenderFormat(format.to_string()));
        }
        tracing::info!(
            device = %endpoint.name,
            buffer_frames = endpoint.client.buffer_frames(),
            frame_size = format.frame_size(),
            %format,
            "output configured"
        );
        self.output = Some(OutputSide {
            name: endpoint.name,
            control: endpoint.control,
            client: Some(endpoint.client),
        });
        Ok(())
    }

    /// Install the hook run between forward and inverse transform
    pub fn set_spectral_processor(&mut self, processor: Box<dyn SpectralProcessor>) -> AudioResult<()> {
        self.require(ProcessorState::Idle, "replace spectral processor")?;
        self.spectral = Some(processor);
        Ok(())
    }

    pub fn pitch_scale(&self) -> f64 {
        self.pitch.get()
    }

    /// Settable at any time; the worker picks it up on its next block
    pub fn set_pitch_scale(&self, scale: f64) {
        self.pitch.set(scale);
    }

    /// Subscribe to peak reports and worker exits
    pub fn events(&self) -> Receiver<ProcessorEvent> {
        self.event_rx.clone()
    }

    /// Most recent peak report, if any block has been processed
    pub fn latest_peaks(&self) -> Option<PeakReport> {
        self.latest.lock().clone()
    }

    pub fn blocks_processed(&self) -> u64 {
        self.blocks_processed.load(Ordering::Relaxed)
    }

    /// Events evicted this session because no one was draining the channel
    pub fn events_dropped(&self) -> u64 {
        self.events_dropped.load(Ordering::Relaxed)
    }

    /// True once the worker has exited on its own (fatal cycle error)
    pub fn worker_finished(&self) -> bool {
        self.worker.as_ref().map(|w| w.is_finished()).unwrap_or(false)
    }

    /// Start both device streams and launch the capture worker
    pub fn start(&mut self) -> AudioResult<()> {
        self.require(ProcessorState::Idle, "start")?;
        self.config.validate()?;

        let input = self.input.as_mut().ok_or(AudioError::NotConfigured("Input"))?;
        let output = self.output.as_mut().ok_or(AudioError::NotConfigured("Output"))?;
        if input.client.is_none() {
            return Err(AudioError::NotConfigured("Input"));
        }
        if output.client.is_none() {
            return Err(AudioError::NotConfigured("Output"));
        }

        input.control.start()?;
        if let Err(e) = output.control.start() {
            if let Err(stop_err) = input.control.stop() {
                tracing::warn!(error = %stop_err, "failed to stop input after output start failure");
            }
            return Err(e);
        }

        let (capture, render) = match (input.client.take(), output.client.take()) {
            (Some(capture), Some(render)) => (capture, render),
            _ => return Err(AudioError::NotConfigured("Input")),
        };
        let spectral: Box<dyn SpectralProcessor> = self.spectral.take().unwrap_or_else(|| Box::new(PassThrough));

        // Fresh flag per session
        self.cancel = Arc::new(AtomicBool::new(false));
        self.blocks_processed.store(0, Ordering::Relaxed);
        self.events_dropped.store(0, Ordering::Relaxed);
        while self.event_rx.try_recv().is_ok() {}

        let pipeline = Pipeline::new(
            capture,
            render,
            spectral,
            &self.config,
            self.cancel.clone(),
            self.pitch.clone(),
            Outlets {
                events: self.event_tx.clone(),
                stale: self.event_rx.clone(),
                latest: self.latest.clone(),
                blocks_processed: self.blocks_processed.clone(),
                events_dropped: self.events_dropped.clone(),
            },
        );

        tracing::info!(
            input = %input.name,
            output = %output.name,
            block_size = self.config.block_size,
            "starting capture"
        );

        let worker = thread::Builder::new()
            .name("soundboard-capture".into())
            .spawn(move || pipeline.run_to_exit())
            .map_err(|e| AudioError::Device(format!("failed to spawn capture worker: {}", e)));

        match worker {
            Ok(handle) => {
                self.worker = Some(handle);
                Ok(())
            }
            Err(e) => {
                // The clients went down with the closure; the devices must be reopened
                self.stop_streams();
                self.input = None;
                self.output = None;
                Err(e)
            }
        }
    }

    /// Cancel the worker, wait for it to exit, then stop both device streams
    ///
    /// Returns the worker's fatal error if it exited on one. The processor
    /// is idle afterwards either way.
    pub fn stop(&mut self) -> AudioResult<()> {
        self.require(ProcessorState::Capturing, "stop")?;
        let Some(worker) = self.worker.take() else {
            return Err(AudioError::InvalidState {
                op: "stop",
                state: ProcessorState::Idle.name(),
            });
        };

        self.cancel.store(true, Ordering::Release);
        let joined = worker.join();
        let stream_result = self.stop_streams();

        let result = match joined {
            Ok(exit) => {
                if let Some(input) = self.input.as_mut() {
                    input.client = Some(exit.capture);
                }
                if let Some(output) = self.output.as_mut() {
                    output.client = Some(exit.render);
                }
                self.spectral = Some(exit.spectral);
                exit.result
            }
            Err(_) => {
                tracing::error!("capture worker panicked");
                self.input = None;
                self.output = None;
                self.spectral = Some(Box::new(PassThrough));
                Err(AudioError::WorkerPanicked)
            }
        };

        tracing::info!(blocks = self.blocks_processed(), "capture stopped");
        result.and(stream_result)
    }

    fn stop_streams(&mut self) -> AudioResult<()> {
        let mut result = Ok(());
        if let Some(input) = self.input.as_mut() {
            if let Err(e) = input.control.stop() {
                tracing::warn!(error = %e, "failed to stop input stream");
                result = Err(e);
            }
        }
        if let Some(output) = self.output.as_mut() {
            if let Err(e) = output.control.stop() {
                tracing::warn!(error = %e, "failed to stop output stream");
                result = result.and(Err(e));
            }
        }
        result
    }
}

impl Drop for AudioProcessor {
    fn drop(&mut self) {
        if self.worker.is_some() {
            if let Err(e) = self.stop() {
                tracing::warn!(error = %e, "capture ended with error during shutdown");
            }
        }
    }
}

/// Where the worker publishes its observations
struct Outlets {
    events: Sender<ProcessorEvent>,
    /// Receiving end used to evict the oldest event when the channel is full
    stale: Receiver<ProcessorEvent>,
    latest: Arc<Mutex<Option<PeakReport>>>,
    blocks_processed: Arc<AtomicU64>,
    events_dropped: Arc<AtomicU64>,
}

impl Outlets {
    /// Queue `event`, evicting the oldest queued event while the channel is full
    ///
    /// The newest events always get through, including the final `Stopped`.
    fn post(&self, mut event: ProcessorEvent) {
        loop {
            match self.events.try_send(event) {
                Ok(()) | Err(TrySendError::Disconnected(_)) => return,
                Err(TrySendError::Full(returned)) => {
                    event = returned;
                    if self.stale.try_recv().is_ok() {
                        let dropped = self.events_dropped.fetch_add(1, Ordering::Relaxed) + 1;
                        if dropped == 1 {
                            tracing::warn!("event consumer is falling behind, discarding oldest events");
                        } else {
                            tracing::trace!(dropped, "discarded oldest event");
                        }
                    }
                }
            }
        }
    }
}

/// Worker-side state (held on the capture thread)
struct Pipeline {
    capture: Box<dyn CaptureClient>,
    render: Box<dyn RenderClient>,
    spectral: Box<dyn SpectralProcessor>,
    in_format: StreamFormat,
    out_format: StreamFormat,
    block_size: usize,
    idle_backoff: std::time::Duration,
    detector: PeakDetector,
    cancel: Arc<AtomicBool>,
    pitch: PitchScale,
    outlets: Outlets,
    // Working buffers reused across blocks
    queues: ChannelQueues,
    frame: Vec<Sample>,
    transform: TransformEngine,
    mono: Vec<f32>,
    spectrum: Vec<Complex>,
    restored: Vec<f32>,
}

impl Pipeline {
    fn new(
        capture: Box<dyn CaptureClient>,
        render: Box<dyn RenderClient>,
        spectral: Box<dyn SpectralProcessor>,
        config: &ProcessorConfig,
        cancel: Arc<AtomicBool>,
        pitch: PitchScale,
        outlets: Outlets,
    ) -> Self {
        let in_format = capture.format().clone();
        let out_format = render.format().clone();
        let channels = in_format.channels as usize;
        let block_size = config.block_size;
        Self {
            capture,
            render,
            spectral,
            in_format,
            out_format,
            block_size,
            idle_backoff: config.idle_backoff,
            detector: config.peak_detector,
            cancel,
            pitch,
            outlets,
            queues: ChannelQueues::new(channels, block_size * 2),
            frame: Vec::with_capacity(channels),
            transform: TransformEngine::new(block_size),
            mono: Vec::with_capacity(block_size),
            spectrum: Vec::with_capacity(block_size),
            restored: Vec::with_capacity(block_size),
        }
    }

    #[inline]
    fn cancelled(&self) -> bool {
        self.cancel.load(Ordering::Acquire)
    }

    fn run_to_exit(mut self) -> WorkerExit {
        self.spectral.reset();
        let result = self.run();

        let error = match &result {
            Ok(()) => None,
            Err(e) => {
                tracing::error!(error = %e, "capture cycle failed");
                Some(e.to_string())
            }
        };
        self.outlets.post(ProcessorEvent::Stopped { error });

        WorkerExit {
            capture: self.capture,
            render: self.render,
            spectral: self.spectral,
            result,
        }
    }

    /// Cycle until cancelled or a fatal error
    fn run(&mut self) -> AudioResult<()> {
        while !self.cancelled() {
            let mut next_packet = self.capture.next_packet_size()?;
            if next_packet == 0 {
                thread::sleep(self.idle_backoff);
                continue;
            }

            while next_packet != 0 && !self.cancelled() {
                self.read_packet()?;
                while !self.cancelled() {
                    let Some(block) = self.queues.drain_block(self.block_size) else {
                        break;
                    };
                    self.process_block(block)?;
                }
                next_packet = self.capture.next_packet_size()?;
            }
        }
        // Frames short of a full block are discarded with the session
        self.queues.clear();
        Ok(())
    }

    /// Decode one capture packet into the channel queues
    ///
    /// The packet is released even when decoding it fails.
    fn read_packet(&mut self) -> AudioResult<()> {
        let packet = self.capture.get_buffer()?;
        let frames = packet.frames;
        let flags = packet.flags;
        tracing::trace!(frames, silent = flags.silent, "capture packet");
        if flags.discontinuity {
            tracing::warn!(frames, "capture discontinuity, input was lost before this packet");
        }

        let data = if flags.silent { None } else { Some(packet.data) };
        let queued = enqueue_packet(data, &self.in_format, frames, &mut self.frame, &mut self.queues);
        let released = self.capture.release_buffer(frames);
        queued.and(released)
    }

    /// Run one full block through the transform stage and render it
    fn process_block(&mut self, block: Vec<Channel>) -> AudioResult<()> {
        let mono = mix_down(block)?;
        self.mono.clear();
        self.mono.extend(mono.iter_f32());

        self.transform.forward_into(&self.mono, &mut self.spectrum);

        let report = self.detector.report(&self.spectrum, self.in_format.sample_rate);
        let peak_count = report.peaks.len();
        self.publish(report);

        let pitch = self.pitch.get();
        self.spectral
            .process(&mut self.spectrum, pitch, self.in_format.sample_rate)?;

        self.transform.inverse_into(&self.spectrum, &mut self.restored)?;
        let restored = Channel::from_f32s(&self.restored);
        let output = modify_channels(vec![restored], self.out_format.channels as usize)?;
        let frames = match output.first() {
            Some(channel) => channel.len(),
            None => return Err(AudioError::ZeroChannels),
        };

        let buffer = self.render.get_buffer(frames)?;
        FrameWriter::new(buffer, &self.out_format, frames)?.write_channels(&output)?;
        self.render.release_buffer(frames, BufferFlags::default())?;

        let blocks = self.outlets.blocks_processed.fetch_add(1, Ordering::Relaxed) + 1;
        tracing::debug!(
            block = blocks,
            frames,
            out_channels = output.len(),
            peaks = peak_count,
            pitch,
            "block rendered"
        );
        Ok(())
    }

    fn publish(&self, report: PeakReport) {
        *self.outlets.latest.lock() = Some(report.clone());
        self.outlets.post(ProcessorEvent::Peaks(report));
    }
}

/// Push `frames` frames into `queues`, as zeros when `data` is `None`
fn enqueue_packet(
    data: Option<&[u8]>,
    format: &StreamFormat,
    frames: usize,
    frame: &mut Vec<Sample>,
    queues: &mut ChannelQueues,
) -> AudioResult<()> {
    match data {
        None => {
            frame.clear();
            frame.resize(queues.channels(), Sample::from_f32(0.0));
            for _ in 0..frames {
                queues.push_frame(frame.as_slice())?;
            }
        }
        Some(data) => {
            let reader = FrameReader::new(data, format, frames)?;
            for index in 0..reader.frames() {
                reader.read_frame(index, frame)?;
                queues.push_frame(frame.as_slice())?;
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DEFAULT_EVENT_CAPACITY;
    use crate::device::mock::{mock_input, mock_output, MockInputHandle, MockOutputHandle};
    use crate::device::CapturePacket;
    use crate::format::SampleEncoding;
    use std::sync::atomic::AtomicUsize;
    use std::time::{Duration, Instant};

    fn wait_until(timeout: Duration, mut condition: impl FnMut() -> bool) -> bool {
        let start = Instant::now();
        while start.elapsed() < timeout {
            if condition() {
                return true;
            }
            thread::sleep(Duration::from_millis(1));
        }
        condition()
    }

    fn processor_with(
        block_size: usize,
        input: StreamFormat,
        output: StreamFormat,
    ) -> (AudioProcessor, MockInputHandle, MockOutputHandle) {
        let config = ProcessorConfig::default()
            .with_block_size(block_size)
            .with_idle_backoff(Duration::from_micros(200));
        let mut processor = AudioProcessor::new(config);
        let (input, input_handle) = mock_input("mic", input);
        let (output, output_handle) = mock_output("speakers", output, true);
        processor.configure_input(input).unwrap();
        processor.configure_output(output).unwrap();
        (processor, input_handle, output_handle)
    }

    fn sine(freq: f64, sample_rate: u32, len: usize) -> Vec<f32> {
        (0..len)
            .map(|i| (2.0 * std::f64::consts::PI * freq * i as f64 / sample_rate as f64).sin() as f32)
            .collect()
    }

    #[test]
    fn test_start_requires_configuration() {
        let mut processor = AudioProcessor::default();
        assert!(matches!(processor.start(), Err(AudioError::NotConfigured("Input"))));

        let (input, _) = mock_input("mic", StreamFormat::float32(1, 48000));
        processor.configure_input(input).unwrap();
        assert!(matches!(processor.start(), Err(AudioError::NotConfigured("Output"))));
        assert_eq!(processor.state(), ProcessorState::Idle);
    }

    #[test]
    fn test_unsupported_formats_rejected_at_configuration() {
        let mut processor = AudioProcessor::default();

        let mut pcm = StreamFormat::float32(2, 44100);
        pcm.encoding = SampleEncoding::Pcm;
        pcm.bits_per_sample = 16;
        pcm.block_align = 4;

        let (input, _) = mock_input("mic", pcm.clone());
        let err = processor.configure_input(input).unwrap_err();
        assert!(matches!(err, AudioError::UnsupportedCaptureFormat(_)));
        assert!(err.is_configuration());

        let (output, _) = mock_output("speakers", pcm, false);
        let err = processor.configure_output(output).unwrap_err();
        assert!(err.to_string().starts_with("Render format not supported"));

        assert!(matches!(processor.start(), Err(AudioError::NotConfigured(_))));
    }

    #[test]
    fn test_invalid_transitions() {
        let (mut processor, _input, _output) =
            processor_with(256, StreamFormat::float32(1, 48000), StreamFormat::float32(1, 48000));
        assert!(matches!(processor.stop(), Err(AudioError::InvalidState { op: "stop", .. })));

        processor.start().unwrap();
        assert_eq!(processor.state(), ProcessorState::Capturing);
        assert!(matches!(processor.start(), Err(AudioError::InvalidState { op: "start", .. })));

        let (input, _) = mock_input("other", StreamFormat::float32(1, 48000));
        assert!(matches!(processor.configure_input(input), Err(AudioError::InvalidState { .. })));

        processor.stop().unwrap();
        assert!(matches!(processor.stop(), Err(AudioError::InvalidState { .. })));
    }

    #[test]
    fn test_stereo_pass_through_renders_mixdown() {
        let block = 256;
        let (mut processor, input, output) =
            processor_with(block, StreamFormat::float32(2, 48000), StreamFormat::float32(2, 48000));

        // Two full blocks plus a remainder that never completes a block
        let frames = block * 2 + 50;
        let left = sine(440.0, 48000, frames);
        let right = sine(1000.0, 48000, frames);
        let interleaved: Vec<f32> = left.iter().zip(right.iter()).flat_map(|(l, r)| [*l, 0.5 * r]).collect();
        input.push_frames(&interleaved, 100);

        processor.start().unwrap();
        assert!(input.is_running() && output.is_running());
        assert!(wait_until(Duration::from_secs(5), || processor.blocks_processed() == 2));
        processor.stop().unwrap();

        assert_eq!(output.frames_rendered(), block * 2);
        let rendered = output.rendered_f32();
        assert_eq!(rendered.len(), block * 2 * 2);
        for frame in 0..block * 2 {
            let expected = (left[frame] + 0.5 * right[frame]) / 2.0;
            assert!((rendered[frame * 2] - expected).abs() < 1e-4, "frame {}", frame);
            assert!((rendered[frame * 2 + 1] - expected).abs() < 1e-4, "frame {}", frame);
        }
    }

    #[test]
    fn test_full_block_round_trip_and_upmix() {
        let block = soundboard_analysis::NUM_SAMPLES_TO_PROCESS;
        let (mut processor, input, output) =
            processor_with(block, StreamFormat::float32(1, 44100), StreamFormat::float32(4, 44100));

        let signal = sine(220.0, 44100, block);
        input.push_frames(&signal, 441);

        processor.start().unwrap();
        assert!(wait_until(Duration::from_secs(5), || processor.blocks_processed() == 1));
        processor.stop().unwrap();

        let rendered = output.rendered_f32();
        assert_eq!(rendered.len(), block * 4);
        for (frame, expected) in signal.iter().enumerate() {
            for channel in 0..4 {
                assert!((rendered[frame * 4 + channel] - expected).abs() < 1e-4);
            }
        }
    }

    #[test]
    fn test_peak_report_per_block() {
        let (mut processor, input, _output) =
            processor_with(2048, StreamFormat::float32(1, 1024), StreamFormat::float32(2, 1024));
        let events = processor.events();
        input.push_frames(&sine(1.0, 1024, 2048), 512);

        processor.start().unwrap();
        let report = match events.recv_timeout(Duration::from_secs(5)) {
            Ok(ProcessorEvent::Peaks(report)) => report,
            other => panic!("expected peaks, got {:?}", other),
        };
        processor.stop().unwrap();

        assert_eq!(report.resolution_hz, 0.5);
        assert_eq!(report.peaks.len(), 1);
        assert!((report.peaks[0].frequency_hz - 1.0).abs() < 1e-9);
        assert_eq!(processor.latest_peaks(), Some(report));

        match events.recv_timeout(Duration::from_secs(1)) {
            Ok(ProcessorEvent::Stopped { error: None }) => {}
            other => panic!("expected clean stop, got {:?}", other),
        }
    }

    #[test]
    fn test_stop_is_prompt_under_continuous_input() {
        let mut processor = AudioProcessor::default();
        let (input, input_handle) = mock_input("mic", StreamFormat::float32(2, 48000));
        let (output, output_handle) = mock_output("speakers", StreamFormat::float32(2, 48000), false);
        processor.configure_input(input).unwrap();
        processor.configure_output(output).unwrap();
        input_handle.loop_tone(440.0, 0.5, 480, false);

        processor.start().unwrap();
        assert!(wait_until(Duration::from_secs(5), || processor.blocks_processed() > 0));

        let started = Instant::now();
        processor.stop().unwrap();
        assert!(started.elapsed() < Duration::from_secs(1), "stop took {:?}", started.elapsed());

        assert_eq!(processor.state(), ProcessorState::Idle);
        assert!(!input_handle.is_running());
        assert!(!output_handle.is_running());
        assert_eq!(input_handle.stops(), 1);
        assert_eq!(output_handle.stops(), 1);
        assert!(output_handle.frames_rendered() > 0);
    }

    #[test]
    fn test_device_error_ends_session() {
        let (mut processor, input, _output) =
            processor_with(256, StreamFormat::float32(1, 48000), StreamFormat::float32(1, 48000));
        let events = processor.events();
        processor.start().unwrap();

        input.fail("device unplugged");
        assert!(wait_until(Duration::from_secs(5), || processor.worker_finished()));
        match events.recv_timeout(Duration::from_secs(1)) {
            Ok(ProcessorEvent::Stopped { error: Some(message) }) => assert!(message.contains("device unplugged")),
            other => panic!("expected error stop, got {:?}", other),
        }

        let err = processor.stop().unwrap_err();
        assert!(matches!(err, AudioError::Device(_)));
        assert_eq!(processor.state(), ProcessorState::Idle);
        assert!(!input.is_running());

        // Clients come back with the worker, so the session can restart
        processor.start().unwrap();
        processor.stop().unwrap();
        assert_eq!(input.starts(), 2);
    }

    struct Silencer {
        seen: Arc<Mutex<Vec<f64>>>,
    }

    impl SpectralProcessor for Silencer {
        fn process(&mut self, spectrum: &mut [Complex], pitch_scale: f64, _sample_rate: u32) -> AudioResult<()> {
            self.seen.lock().push(pitch_scale);
            spectrum.fill(Complex::ZERO);
            Ok(())
        }
    }

    #[test]
    fn test_spectral_hook_receives_pitch_scale() {
        let (mut processor, input, output) =
            processor_with(256, StreamFormat::float32(1, 48000), StreamFormat::float32(1, 48000));
        let seen = Arc::new(Mutex::new(Vec::new()));
        processor
            .set_spectral_processor(Box::new(Silencer { seen: seen.clone() }))
            .unwrap();

        assert_eq!(processor.pitch_scale(), 1.0);
        processor.set_pitch_scale(1.5);

        input.push_frames(&sine(1000.0, 48000, 256), 64);
        processor.start().unwrap();
        assert!(wait_until(Duration::from_secs(5), || processor.blocks_processed() == 1));
        processor.stop().unwrap();

        assert_eq!(seen.lock().as_slice(), &[1.5]);
        assert!(output.rendered_f32().iter().all(|&v| v == 0.0));
    }

    #[test]
    fn test_set_config_validates_block_size() {
        let mut processor = AudioProcessor::default();
        assert!(matches!(
            processor.set_config(ProcessorConfig::default().with_block_size(1000)),
            Err(AudioError::BlockSize(1000))
        ));
        processor
            .set_config(ProcessorConfig::default().with_block_size(512))
            .unwrap();
        assert_eq!(processor.config().block_size, 512);
    }

    #[test]
    fn test_stopped_event_survives_backlog() {
        let block = 64;
        let (mut processor, input, _output) =
            processor_with(block, StreamFormat::float32(1, 48000), StreamFormat::float32(1, 48000));
        let events = processor.events();
        input.push_frames(&sine(1000.0, 48000, block * 80), 256);

        processor.start().unwrap();
        assert!(wait_until(Duration::from_secs(5), || processor.blocks_processed() == 80));
        input.fail("unplugged");
        assert!(wait_until(Duration::from_secs(5), || processor.worker_finished()));

        // 80 reports plus the exit event through a 64-slot channel
        let drained: Vec<ProcessorEvent> = events.try_iter().collect();
        assert_eq!(drained.len(), DEFAULT_EVENT_CAPACITY);
        assert_eq!(processor.events_dropped(), 81 - DEFAULT_EVENT_CAPACITY as u64);
        match drained.last() {
            Some(ProcessorEvent::Stopped { error: Some(message) }) => assert!(message.contains("unplugged")),
            other => panic!("expected error stop last, got {:?}", other),
        }
        match &drained[drained.len() - 2] {
            ProcessorEvent::Peaks(report) => assert_eq!(Some(report.clone()), processor.latest_peaks()),
            other => panic!("expected newest peaks, got {:?}", other),
        }

        assert!(matches!(processor.stop(), Err(AudioError::Device(_))));
    }

    #[test]
    fn test_flagged_packets_stay_in_lock_step() {
        let block = 64;
        let (mut processor, input, output) =
            processor_with(block, StreamFormat::float32(2, 48000), StreamFormat::float32(2, 48000));

        let filler: Vec<u8> = std::iter::repeat(0.75f32.to_le_bytes()).take(32 * 2).flatten().collect();
        input.push_frames(&[0.5; 32 * 2], 32);
        // Contents of a silent packet are ignored
        input.push_flagged_packet(
            filler.clone(),
            BufferFlags {
                silent: true,
                discontinuity: false,
            },
        );
        // A discontinuity still carries valid data
        for _ in 0..2 {
            input.push_flagged_packet(
                filler.clone(),
                BufferFlags {
                    silent: false,
                    discontinuity: true,
                },
            );
        }

        processor.start().unwrap();
        assert!(wait_until(Duration::from_secs(5), || processor.blocks_processed() == 2));
        processor.stop().unwrap();

        let rendered = output.rendered_f32();
        assert_eq!(rendered.len(), block * 2 * 2);
        for (frame, pair) in rendered.chunks_exact(2).enumerate() {
            let expected = match frame {
                0..=31 => 0.5,
                32..=63 => 0.0,
                _ => 0.75,
            };
            for &value in pair {
                assert!((value - expected).abs() < 1e-4, "frame {}: {}", frame, value);
            }
        }
    }

    struct NoopControl;

    impl StreamControl for NoopControl {
        fn start(&mut self) -> AudioResult<()> {
            Ok(())
        }

        fn stop(&mut self) -> AudioResult<()> {
            Ok(())
        }
    }

    /// Serves one packet claiming more frames than its bytes hold
    struct OverstatedCapture {
        format: StreamFormat,
        data: Vec<u8>,
        served: bool,
        released: Arc<AtomicUsize>,
    }

    impl CaptureClient for OverstatedCapture {
        fn format(&self) -> &StreamFormat {
            &self.format
        }

        fn buffer_frames(&self) -> usize {
            16
        }

        fn next_packet_size(&mut self) -> AudioResult<usize> {
            Ok(if self.served { 0 } else { 8 })
        }

        fn get_buffer(&mut self) -> AudioResult<CapturePacket<'_>> {
            self.served = true;
            Ok(CapturePacket {
                data: &self.data,
                frames: 8,
                flags: BufferFlags::default(),
            })
        }

        fn release_buffer(&mut self, frames: usize) -> AudioResult<()> {
            self.released.fetch_add(frames, Ordering::SeqCst);
            Ok(())
        }
    }

    #[test]
    fn test_packet_released_when_decoding_fails() {
        let format = StreamFormat::float32(1, 48000);
        let released = Arc::new(AtomicUsize::new(0));
        let mut processor = AudioProcessor::new(ProcessorConfig::default().with_block_size(64));
        processor
            .configure_input(InputEndpoint {
                name: "short".into(),
                control: Box::new(NoopControl),
                client: Box::new(OverstatedCapture {
                    format: format.clone(),
                    data: vec![0; 4 * 4],
                    served: false,
                    released: released.clone(),
                }),
            })
            .unwrap();
        let (output, _) = mock_output("speakers", format, false);
        processor.configure_output(output).unwrap();

        processor.start().unwrap();
        assert!(wait_until(Duration::from_secs(5), || processor.worker_finished()));
        assert!(matches!(processor.stop(), Err(AudioError::BufferTooSmall { .. })));
        assert_eq!(released.load(Ordering::SeqCst), 8);
    }
}
