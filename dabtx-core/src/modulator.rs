//! The DAB modulator codec: raw ETI frames in, baseband I/Q
//! transmission frames out.
//!
//! One call consumes one 24 ms ETI frame. Modes whose transmission
//! frame spans several ETI frames (four in TM I, two in TM IV) emit
//! an empty buffer while collecting; the completed frame carries one
//! metadata record per contributing ETI frame, earliest first, so
//! the output stage can pick the earliest timestamp.

use std::sync::{Arc, Mutex};

use num_complex::Complex32;

use crate::buffer::Buffer;
use crate::coding::partitioner::BlockPartitioner;
use crate::errors::{EtiError, ModError, Result};
use crate::eti::timestamp::TimestampDecoder;
use crate::eti::{EtiFraming, EtiReader};
use crate::flowgraph::{FrameMetadata, ModCodec};
use crate::gain::{GainControl, GainMode};
use crate::ofdm::generator::OfdmGenerator;
use crate::ofdm::guard::GuardIntervalInserter;
use crate::ofdm::modulator::DifferentialModulator;
use crate::ofdm::params::OfdmParams;
use crate::ofdm::tii::{Tii, TiiConfig};

#[derive(Debug, Clone)]
pub struct ModulatorConfig {
    /// 0 selects the mode signalled in the ETI stream.
    pub mode: u8,
    pub gain_mode: GainMode,
    pub digital_gain: f32,
    pub normalise_variance: f32,
    pub tii: TiiConfig,
    /// Raised-cosine overlap between consecutive OFDM symbols.
    pub window_overlap: usize,
    /// Fixed timestamp offset in seconds.
    pub tist_offset: f64,
}

impl Default for ModulatorConfig {
    fn default() -> Self {
        ModulatorConfig {
            mode: 0,
            gain_mode: GainMode::Var,
            digital_gain: 1.0,
            normalise_variance: 4.0,
            tii: TiiConfig::default(),
            window_overlap: 0,
            tist_offset: 0.0,
        }
    }
}

/// Mode-dependent part of the chain, built once the mode is known.
struct Chain {
    params: OfdmParams,
    partitioner: BlockPartitioner,
    diff_mod: DifferentialModulator,
    tii: Tii,
    generator: OfdmGenerator,
    guard: GuardIntervalInserter,
    /// Transmission frames since the last FP=0 alignment point.
    tii_phase: u64,
}

impl Chain {
    fn new(mode: u8, config: &ModulatorConfig) -> Result<Self> {
        let params = OfdmParams::new(mode)?;
        Ok(Chain {
            partitioner: BlockPartitioner::new(&params),
            diff_mod: DifferentialModulator::new(params),
            tii: Tii::new(&params, config.tii)?,
            generator: OfdmGenerator::new(params),
            guard: GuardIntervalInserter::new(params, config.window_overlap),
            params,
            tii_phase: 0,
        })
    }
}

pub struct Modulator {
    config: ModulatorConfig,
    reader: EtiReader,
    decoder: Arc<Mutex<TimestampDecoder>>,
    gain: GainControl,
    chain: Option<Chain>,
    /// Metadata of the ETI frames collected for the pending
    /// transmission frame.
    pending_meta: Vec<FrameMetadata>,
    /// FC frame phase of the earliest collected ETI frame.
    pending_first_fp: u8,
    /// Metadata to emit alongside the buffer just produced.
    emitted_meta: Vec<FrameMetadata>,
    carriers_scratch: Vec<Complex32>,
    ifft_scratch: Vec<Complex32>,
    frames_out: u64,
}

impl Modulator {
    /// A fixed mode in the configuration builds the chain eagerly
    /// (and validates the TII settings); mode 0 defers to the first
    /// ETI frame.
    pub fn new(config: ModulatorConfig, framing: EtiFraming) -> Result<Self> {
        let decoder = Arc::new(Mutex::new(TimestampDecoder::new(config.tist_offset)));
        let chain = match config.mode {
            0 => None,
            mode => Some(Chain::new(mode, &config)?),
        };
        Ok(Modulator {
            reader: EtiReader::new(framing, decoder.clone()),
            gain: GainControl::new(
                config.gain_mode,
                config.digital_gain,
                config.normalise_variance,
            ),
            config,
            decoder,
            chain,
            pending_meta: Vec::new(),
            pending_first_fp: 0,
            emitted_meta: Vec::new(),
            carriers_scratch: Vec::new(),
            ifft_scratch: Vec::new(),
            frames_out: 0,
        })
    }

    pub fn decoder(&self) -> Arc<Mutex<TimestampDecoder>> {
        self.decoder.clone()
    }

    pub fn gain_control(&self) -> &GainControl {
        &self.gain
    }

    /// TII controllable; only available once the mode is known.
    pub fn tii_controllable(&self) -> Option<Arc<crate::ofdm::tii::TiiControl>> {
        self.chain.as_ref().map(|c| c.tii.controllable())
    }

    pub fn frames_out(&self) -> u64 {
        self.frames_out
    }

    pub fn params(&self) -> Option<&OfdmParams> {
        self.chain.as_ref().map(|c| &c.params)
    }

    fn modulate_tx_frame(&mut self, bits: Vec<u8>, first_fp: u8, out: &mut Buffer) -> Result<usize> {
        let chain = self.chain.as_mut().expect("chain built before modulation");

        // Null symbol carriers first, then PRS and data symbols.
        let k = chain.params.carriers;
        self.carriers_scratch.clear();
        self.carriers_scratch.resize(k, Complex32::new(0.0, 0.0));

        // One TII frame in four, phase-aligned with FP = 0. In TM I
        // the FP cycle spans only two transmission frames, so FP = 0
        // re-aligns a drifted counter instead of resetting it.
        if first_fp == 0 && chain.tii_phase % 2 == 1 {
            chain.tii_phase = 0;
        }
        let insert = chain.tii_phase % 4 == 0;
        chain.tii_phase += 1;
        chain
            .tii
            .process(&mut self.carriers_scratch, chain.diff_mod.phase_ref(), insert);

        let data_carriers = chain.diff_mod.modulate(&bits);
        self.carriers_scratch.extend_from_slice(&data_carriers);

        chain
            .generator
            .process(&self.carriers_scratch, &mut self.ifft_scratch);

        let mut samples = Vec::new();
        chain.guard.process(&self.ifft_scratch, &mut samples);
        self.gain.process(&mut samples);

        out.set_complex_len(samples.len());
        out.as_complex_mut().copy_from_slice(&samples);
        self.frames_out += 1;
        Ok(out.len())
    }
}

impl ModCodec for Modulator {
    fn name(&self) -> &str {
        "DabModulator"
    }

    fn process(&mut self, input: &Buffer, out: &mut Buffer) -> Result<usize> {
        out.clear();
        self.emitted_meta.clear();

        let frames_before = self.reader.frames_complete();
        match self.reader.process(input.as_bytes()) {
            Ok(_) => {}
            Err(ModError::Eti(EtiError::InsufficientInput)) => return Ok(0),
            Err(e) => return Err(e),
        }
        if self.reader.frames_complete() == frames_before {
            return Ok(0);
        }

        let mode = match self.config.mode {
            0 => self.reader.mode().expect("mode known after first frame"),
            m => m,
        };
        if self.chain.is_none() {
            self.chain = Some(Chain::new(mode, &self.config)?);
        }

        if self.pending_meta.is_empty() {
            // FP of the earliest ETI frame gates the TII insertion.
            self.pending_first_fp = self.reader.fc().map(|fc| fc.fp).unwrap_or(0);
        }
        self.pending_meta.push(FrameMetadata {
            ts: self.decoder.lock().unwrap().timestamp(),
        });

        let chain = self.chain.as_mut().expect("chain built above");
        let (fic, subchannels) = self.reader.coding_sources();
        let fic = fic.expect("FIC source exists after a parsed frame");
        let ready = chain.partitioner.partition(fic, subchannels);

        match ready {
            Some(bits) => {
                let meta = std::mem::take(&mut self.pending_meta);
                let first_fp = self.pending_first_fp;
                let produced = self.modulate_tx_frame(bits, first_fp, out)?;
                self.emitted_meta = meta;
                Ok(produced)
            }
            None => Ok(0),
        }
    }

    fn process_metadata(&mut self, _meta: &[FrameMetadata]) -> Vec<FrameMetadata> {
        std::mem::take(&mut self.emitted_meta)
    }
}
