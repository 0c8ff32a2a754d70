//! Memoryless digital predistorter.
//!
//! Two interchangeable models, selected by the first integer of the
//! coefficient file:
//!
//! 1. odd-only polynomial: five AM/AM and five AM/PM coefficients,
//!    both evaluated in |x|²; the phase term is negated and applied
//!    through degree-6/5 Taylor approximations of cos/sin.
//! 2. lookup table: 32 complex correction factors indexed by the
//!    number of leading zero bits of round(|x| · scalefactor).
//!
//! Each frame is split into equal slices handed to a worker pool;
//! the stage itself is pipelined with one frame of delay like the
//! FIR filter.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;

use crossbeam::channel::{bounded, unbounded, Receiver, Sender};
use num_complex::Complex32;

use crate::buffer::Buffer;
use crate::controllable::{Controllable, Parameter};
use crate::errors::{DspError, ParameterError, Result};
use crate::flowgraph::{FrameMetadata, ModCodec};
use crate::utils::{set_realtime_prio, set_thread_name};

pub const NUM_POLY_COEFS: usize = 5;
pub const LUT_ENTRIES: usize = 32;

const FILE_FORMAT_ODD_POLY: u32 = 1;
const FILE_FORMAT_LUT: u32 = 2;

/// Coefficient storage, tagged by model.
#[derive(Debug, Clone, PartialEq)]
pub enum DpdModel {
    OddOnlyPoly {
        am: [f32; NUM_POLY_COEFS],
        pm: [f32; NUM_POLY_COEFS],
    },
    LookupTable {
        scalefactor: f32,
        lut: [Complex32; LUT_ENTRIES],
    },
}

impl DpdModel {
    /// Parse a coefficient file. The first integer selects the
    /// model.
    pub fn parse(text: &str) -> std::result::Result<Self, DspError> {
        let mut values = text.split_whitespace();
        let mut next_f32 = |what: &str| -> std::result::Result<f32, DspError> {
            values
                .next()
                .ok_or_else(|| DspError::InvalidCoefFile {
                    reason: format!("missing {}", what),
                })?
                .parse::<f32>()
                .map_err(|_| DspError::InvalidCoefFile {
                    reason: format!("invalid {}", what),
                })
        };

        let format = next_f32("file format indicator")? as u32;
        match format {
            FILE_FORMAT_ODD_POLY => {
                let n_coefs = next_f32("coefficient count")? as usize;
                if n_coefs != NUM_POLY_COEFS {
                    return Err(DspError::InvalidCoefFile {
                        reason: format!("expected {} coefficients, file declares {}", NUM_POLY_COEFS, n_coefs),
                    });
                }
                let mut am = [0.0f32; NUM_POLY_COEFS];
                let mut pm = [0.0f32; NUM_POLY_COEFS];
                for c in am.iter_mut() {
                    *c = next_f32("AM/AM coefficient")?;
                }
                for c in pm.iter_mut() {
                    *c = next_f32("AM/PM coefficient")?;
                }
                Ok(DpdModel::OddOnlyPoly { am, pm })
            }
            FILE_FORMAT_LUT => {
                let scalefactor = next_f32("scale factor")?;
                let mut lut = [Complex32::new(1.0, 0.0); LUT_ENTRIES];
                for entry in lut.iter_mut() {
                    let re = next_f32("LUT entry")?;
                    let im = next_f32("LUT entry")?;
                    *entry = Complex32::new(re, im);
                }
                Ok(DpdModel::LookupTable { scalefactor, lut })
            }
            other => Err(DspError::InvalidCoefFile {
                reason: format!("unknown file format {}", other),
            }),
        }
    }

    pub fn serialise(&self) -> String {
        use std::fmt::Write;
        let mut out = String::new();
        match self {
            DpdModel::OddOnlyPoly { am, pm } => {
                writeln!(out, "{}", FILE_FORMAT_ODD_POLY).unwrap();
                writeln!(out, "{}", NUM_POLY_COEFS).unwrap();
                for c in am.iter().chain(pm.iter()) {
                    writeln!(out, "{}", c).unwrap();
                }
            }
            DpdModel::LookupTable { scalefactor, lut } => {
                writeln!(out, "{}", FILE_FORMAT_LUT).unwrap();
                writeln!(out, "{}", scalefactor).unwrap();
                for e in lut.iter() {
                    writeln!(out, "{} {}", e.re, e.im).unwrap();
                }
            }
        }
        out
    }

    pub fn ncoefs(&self) -> usize {
        match self {
            DpdModel::OddOnlyPoly { .. } => NUM_POLY_COEFS,
            DpdModel::LookupTable { .. } => LUT_ENTRIES,
        }
    }

    /// Apply the model to one slice.
    fn apply(&self, input: &[Complex32], out: &mut [Complex32]) {
        match self {
            DpdModel::OddOnlyPoly { am, pm } => apply_poly(am, pm, input, out),
            DpdModel::LookupTable { scalefactor, lut } => {
                apply_lut(lut, *scalefactor, input, out)
            }
        }
    }
}

fn apply_poly(
    am: &[f32; NUM_POLY_COEFS],
    pm: &[f32; NUM_POLY_COEFS],
    input: &[Complex32],
    out: &mut [Complex32],
) {
    for (x, y) in input.iter().zip(out.iter_mut()) {
        let mag_sq = x.re * x.re + x.im * x.im;

        let amplitude = am[0]
            + mag_sq * (am[1] + mag_sq * (am[2] + mag_sq * (am[3] + mag_sq * am[4])));
        let phase = -(pm[0]
            + mag_sq * (pm[1] + mag_sq * (pm[2] + mag_sq * (pm[3] + mag_sq * pm[4]))));

        let p2 = phase * phase;
        // cos ≈ 1 − x²/2 + x⁴/24 − x⁶/720
        let re = 1.0 - p2 * (0.5 - p2 * (1.0 / 24.0 - p2 * (1.0 / 720.0)));
        // sin ≈ x − x³/6 + x⁵/120
        let im = phase * (1.0 - p2 * (1.0 / 6.0 - p2 * (1.0 / 120.0)));

        *y = *x * amplitude * Complex32::new(re, im);
    }
}

fn apply_lut(
    lut: &[Complex32; LUT_ENTRIES],
    scalefactor: f32,
    input: &[Complex32],
    out: &mut [Complex32],
) {
    for (x, y) in input.iter().zip(out.iter_mut()) {
        let scaled = (x.norm() * scalefactor).round();
        let scaled = if scaled >= u32::MAX as f32 {
            u32::MAX
        } else if scaled <= 0.0 {
            0
        } else {
            scaled as u32
        };
        let index = (scaled.leading_zeros() as usize).min(LUT_ENTRIES - 1);
        *y = *x * lut[index];
    }
}

struct SliceJob {
    input: Arc<Vec<Complex32>>,
    start: usize,
    stop: usize,
    model: Arc<DpdModel>,
    reply: Sender<(usize, Vec<Complex32>)>,
}

/// Worker pool member with its own input queue, constructed in
/// place.
struct PoolWorker {
    jobs: Sender<SliceJob>,
    handle: Option<JoinHandle<()>>,
}

impl PoolWorker {
    fn spawn(index: usize) -> Self {
        let (jobs, rx): (Sender<SliceJob>, Receiver<SliceJob>) = unbounded();
        let handle = std::thread::Builder::new()
            .name(format!("dpd-{}", index))
            .spawn(move || {
                let _ = set_realtime_prio(1);
                set_thread_name("memlesspoly");
                while let Ok(job) = rx.recv() {
                    let mut out = vec![Complex32::new(0.0, 0.0); job.stop - job.start];
                    job.model
                        .apply(&job.input[job.start..job.stop], &mut out);
                    if job.reply.send((job.start, out)).is_err() {
                        break;
                    }
                }
            })
            .expect("spawn DPD worker");
        PoolWorker {
            jobs,
            handle: Some(handle),
        }
    }
}

impl Drop for PoolWorker {
    fn drop(&mut self) {
        // Closing the channel stops the worker.
        let (closed, _) = unbounded();
        self.jobs = closed;
        if let Some(h) = self.handle.take() {
            let _ = h.join();
        }
    }
}

enum PipelineMsg {
    Frame(Buffer),
    Stop,
}

/// The predistorter stage: coordinating thread distributing slices
/// plus the one-frame pipeline wrapper.
pub struct Predistorter {
    model: Arc<Mutex<Option<Arc<DpdModel>>>>,
    coef_file: Arc<Mutex<String>>,
    to_pipeline: Sender<PipelineMsg>,
    from_pipeline: Receiver<Buffer>,
    pipeline: Option<JoinHandle<()>>,
    primed: bool,
    meta_fifo: VecDeque<Vec<FrameMetadata>>,
}

impl Predistorter {
    pub fn new(coef_file: &str, num_workers: usize) -> Result<Self> {
        let text = std::fs::read_to_string(coef_file)?;
        let model = DpdModel::parse(&text)?;
        Ok(Self::with_model(
            Some(model),
            coef_file.to_string(),
            num_workers,
        ))
    }

    pub fn with_model(model: Option<DpdModel>, coef_file: String, num_workers: usize) -> Self {
        let model = Arc::new(Mutex::new(model.map(Arc::new)));
        let (to_pipeline, frame_rx) = bounded::<PipelineMsg>(2);
        let (result_tx, from_pipeline) = bounded::<Buffer>(2);
        let pipeline_model = model.clone();
        let num_workers = num_workers.max(1);

        let pipeline = std::thread::Builder::new()
            .name("dpd-pipeline".into())
            .spawn(move || {
                let _ = set_realtime_prio(1);
                set_thread_name("dpd-pipeline");
                let workers: Vec<PoolWorker> =
                    (0..num_workers).map(PoolWorker::spawn).collect();

                while let Ok(PipelineMsg::Frame(input)) = frame_rx.recv() {
                    let model = pipeline_model.lock().unwrap().clone();
                    let mut output = Buffer::with_len(input.len());
                    match model {
                        Some(model) => {
                            let samples = Arc::new(input.as_complex().to_vec());
                            let n = samples.len();
                            let step = n / workers.len();
                            let (reply_tx, reply_rx) = unbounded();

                            let mut dispatched = 0;
                            let mut start = 0;
                            for worker in &workers {
                                let stop = if dispatched + 1 == workers.len() {
                                    n
                                } else {
                                    start + step
                                };
                                if start < stop {
                                    let job = SliceJob {
                                        input: samples.clone(),
                                        start,
                                        stop,
                                        model: model.clone(),
                                        reply: reply_tx.clone(),
                                    };
                                    if worker.jobs.send(job).is_ok() {
                                        dispatched += 1;
                                    }
                                }
                                start = stop;
                            }
                            drop(reply_tx);

                            let out = output.as_complex_mut();
                            for _ in 0..dispatched {
                                if let Ok((offset, slice)) = reply_rx.recv() {
                                    out[offset..offset + slice.len()]
                                        .copy_from_slice(&slice);
                                }
                            }
                        }
                        None => {
                            // No valid coefficients: pass through.
                            output.set_bytes(input.as_bytes());
                        }
                    }
                    if result_tx.send(output).is_err() {
                        break;
                    }
                }
            })
            .expect("spawn DPD pipeline thread");

        Predistorter {
            model,
            coef_file: Arc::new(Mutex::new(coef_file)),
            to_pipeline,
            from_pipeline,
            pipeline: Some(pipeline),
            primed: false,
            meta_fifo: VecDeque::new(),
        }
    }

    pub fn controllable(&self) -> Arc<PredistorterParams> {
        Arc::new(PredistorterParams {
            model: self.model.clone(),
            coef_file: self.coef_file.clone(),
        })
    }
}

impl ModCodec for Predistorter {
    fn name(&self) -> &str {
        "MemlessPoly"
    }

    fn process(&mut self, input: &Buffer, out: &mut Buffer) -> Result<usize> {
        self.to_pipeline
            .send(PipelineMsg::Frame(input.clone()))
            .map_err(|_| DspError::WorkerGone)?;
        if self.primed {
            *out = self
                .from_pipeline
                .recv()
                .map_err(|_| DspError::WorkerGone)?;
        } else {
            out.set_len(input.len());
            out.as_f32_mut().fill(0.0);
            self.primed = true;
        }
        Ok(out.len())
    }

    fn process_metadata(&mut self, meta: &[FrameMetadata]) -> Vec<FrameMetadata> {
        self.meta_fifo.push_back(meta.to_vec());
        if self.meta_fifo.len() > 1 {
            self.meta_fifo.pop_front().expect("length checked")
        } else {
            Vec::new()
        }
    }
}

impl Drop for Predistorter {
    fn drop(&mut self) {
        let _ = self.to_pipeline.send(PipelineMsg::Stop);
        if let Some(h) = self.pipeline.take() {
            let _ = h.join();
        }
    }
}

/// Exports `memlesspoly.ncoefs` (read-only), `memlesspoly.coefs`,
/// `memlesspoly.coeffile`.
pub struct PredistorterParams {
    model: Arc<Mutex<Option<Arc<DpdModel>>>>,
    coef_file: Arc<Mutex<String>>,
}

impl Controllable for PredistorterParams {
    fn rc_name(&self) -> &str {
        "memlesspoly"
    }

    fn parameters(&self) -> Vec<Parameter> {
        vec![
            Parameter {
                name: "ncoefs",
                description: "(Read-only) number of coefficients",
            },
            Parameter {
                name: "coefs",
                description: "predistortion coefficients, same format as the file",
            },
            Parameter {
                name: "coeffile",
                description: "filename containing coefficients; writing loads the file",
            },
        ]
    }

    fn get_parameter(&self, name: &str) -> std::result::Result<String, ParameterError> {
        match name {
            "ncoefs" => {
                let model = self.model.lock().unwrap();
                Ok(model.as_ref().map(|m| m.ncoefs()).unwrap_or(0).to_string())
            }
            "coefs" => {
                let model = self.model.lock().unwrap();
                match model.as_ref() {
                    Some(m) => Ok(m.serialise()),
                    None => Err(ParameterError::NotAvailable),
                }
            }
            "coeffile" => Ok(self.coef_file.lock().unwrap().clone()),
            _ => Err(ParameterError::NotFound {
                controllable: "memlesspoly".into(),
                name: name.into(),
            }),
        }
    }

    fn set_parameter(&self, name: &str, value: &str) -> std::result::Result<(), ParameterError> {
        let invalid = |reason: String| ParameterError::InvalidValue {
            name: "coefs",
            value: "<coefficients>".into(),
            reason,
        };
        match name {
            "ncoefs" => Err(ParameterError::ReadOnly("ncoefs")),
            "coefs" => {
                let model = DpdModel::parse(value).map_err(|e| invalid(e.to_string()))?;
                *self.model.lock().unwrap() = Some(Arc::new(model));
                // Keep the file in sync so a restart comes back with
                // the same settings.
                let path = self.coef_file.lock().unwrap().clone();
                if !path.is_empty() {
                    let _ = std::fs::write(&path, value);
                }
                Ok(())
            }
            "coeffile" => {
                let text = std::fs::read_to_string(value)
                    .map_err(|e| invalid(e.to_string()))?;
                let model = DpdModel::parse(&text).map_err(|e| invalid(e.to_string()))?;
                *self.model.lock().unwrap() = Some(Arc::new(model));
                *self.coef_file.lock().unwrap() = value.to_string();
                Ok(())
            }
            _ => Err(ParameterError::NotFound {
                controllable: "memlesspoly".into(),
                name: name.into(),
            }),
        }
    }
}
