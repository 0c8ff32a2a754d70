//! FIR spectrum-shaping filter, pipelined across a worker thread.
//!
//! The real taps are applied to I and Q independently; since the
//! samples are interleaved in memory the convolution steps over
//! every other float. The worker adds one frame of pipeline delay:
//! the first call emits a zero frame of matching length, and
//! metadata is delayed by the same one frame.
//!
//! Taps come from a text file whose first integer is the tap count.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;

use crossbeam::channel::{bounded, Receiver, Sender};

use crate::buffer::Buffer;
use crate::controllable::{Controllable, Parameter};
use crate::errors::{DspError, ParameterError, Result};
use crate::flowgraph::{FrameMetadata, ModCodec};
use crate::utils::{set_realtime_prio, set_thread_name};

pub fn parse_taps(text: &str) -> std::result::Result<Vec<f32>, DspError> {
    let mut values = text.split_whitespace();
    let n_taps: usize = values
        .next()
        .ok_or_else(|| DspError::InvalidTapsFile {
            reason: "empty taps file".into(),
        })?
        .parse()
        .map_err(|_| DspError::InvalidTapsFile {
            reason: "tap count is not an integer".into(),
        })?;
    if n_taps == 0 {
        return Err(DspError::InvalidTapsFile {
            reason: "tap count is zero".into(),
        });
    }
    let taps: Vec<f32> = values
        .take(n_taps)
        .map(|v| {
            v.parse().map_err(|_| DspError::InvalidTapsFile {
                reason: format!("invalid tap value '{}'", v),
            })
        })
        .collect::<std::result::Result<_, _>>()?;
    if taps.len() != n_taps {
        return Err(DspError::InvalidTapsFile {
            reason: format!("expected {} taps, found {}", n_taps, taps.len()),
        });
    }
    Ok(taps)
}

pub fn load_taps_file(path: &str) -> Result<Vec<f32>> {
    let text = std::fs::read_to_string(path)?;
    Ok(parse_taps(&text)?)
}

/// Scalar convolution over interleaved I/Q floats. The convolution
/// is cut off at the frame end; the next frame starts with a null
/// symbol anyway.
fn convolve(input: &[f32], taps: &[f32], out: &mut [f32]) {
    debug_assert_eq!(input.len(), out.len());
    let n = input.len();
    for (i, slot) in out.iter_mut().enumerate() {
        let mut acc = 0.0f32;
        for (j, &tap) in taps.iter().enumerate() {
            let idx = i + 2 * j;
            if idx >= n {
                break;
            }
            acc += input[idx] * tap;
        }
        *slot = acc;
    }
}

enum WorkerMsg {
    Frame(Buffer),
    Stop,
}

pub struct FirFilter {
    taps: Arc<Mutex<Vec<f32>>>,
    taps_file: Arc<Mutex<String>>,
    to_worker: Sender<WorkerMsg>,
    from_worker: Receiver<Buffer>,
    worker: Option<JoinHandle<()>>,
    primed: bool,
    meta_fifo: VecDeque<Vec<FrameMetadata>>,
}

impl FirFilter {
    pub fn new(taps_file: &str) -> Result<Self> {
        let taps = Arc::new(Mutex::new(load_taps_file(taps_file)?));
        Ok(Self::with_taps(taps, taps_file.to_string()))
    }

    pub fn from_taps(taps: Vec<f32>) -> Self {
        Self::with_taps(Arc::new(Mutex::new(taps)), String::new())
    }

    fn with_taps(taps: Arc<Mutex<Vec<f32>>>, taps_file: String) -> Self {
        let (to_worker, work_rx) = bounded::<WorkerMsg>(2);
        let (result_tx, from_worker) = bounded::<Buffer>(2);
        let worker_taps = taps.clone();
        let worker = std::thread::Builder::new()
            .name("firfilter".into())
            .spawn(move || {
                let _ = set_realtime_prio(1);
                set_thread_name("firfilter");
                while let Ok(WorkerMsg::Frame(input)) = work_rx.recv() {
                    let mut output = Buffer::with_len(input.len());
                    {
                        let taps = worker_taps.lock().unwrap();
                        convolve(input.as_f32(), &taps, output.as_f32_mut());
                    }
                    if result_tx.send(output).is_err() {
                        break;
                    }
                }
            })
            .expect("spawn FIR worker");
        FirFilter {
            taps,
            taps_file: Arc::new(Mutex::new(taps_file)),
            to_worker,
            from_worker,
            worker: Some(worker),
            primed: false,
            meta_fifo: VecDeque::new(),
        }
    }

    pub fn ntaps(&self) -> usize {
        self.taps.lock().unwrap().len()
    }

    pub fn controllable(&self) -> Arc<FirFilterParams> {
        Arc::new(FirFilterParams {
            taps: self.taps.clone(),
            taps_file: self.taps_file.clone(),
        })
    }
}

impl ModCodec for FirFilter {
    fn name(&self) -> &str {
        "FIRFilter"
    }

    fn process(&mut self, input: &Buffer, out: &mut Buffer) -> Result<usize> {
        self.to_worker
            .send(WorkerMsg::Frame(input.clone()))
            .map_err(|_| DspError::WorkerGone)?;

        if self.primed {
            let filtered = self
                .from_worker
                .recv()
                .map_err(|_| DspError::WorkerGone)?;
            *out = filtered;
        } else {
            // Pipeline prefill: one zero frame of matching length.
            out.set_len(input.len());
            out.as_f32_mut().fill(0.0);
            self.primed = true;
        }
        Ok(out.len())
    }

    fn process_metadata(&mut self, meta: &[FrameMetadata]) -> Vec<FrameMetadata> {
        // One frame of metadata delay, matching the sample delay.
        self.meta_fifo.push_back(meta.to_vec());
        if self.meta_fifo.len() > 1 {
            self.meta_fifo.pop_front().expect("length checked")
        } else {
            Vec::new()
        }
    }
}

impl Drop for FirFilter {
    fn drop(&mut self) {
        let _ = self.to_worker.send(WorkerMsg::Stop);
        if let Some(handle) = self.worker.take() {
            let _ = handle.join();
        }
    }
}

/// Exports `firfilter.ntaps` (read-only) and `firfilter.tapsfile`.
pub struct FirFilterParams {
    taps: Arc<Mutex<Vec<f32>>>,
    taps_file: Arc<Mutex<String>>,
}

impl Controllable for FirFilterParams {
    fn rc_name(&self) -> &str {
        "firfilter"
    }

    fn parameters(&self) -> Vec<Parameter> {
        vec![
            Parameter {
                name: "ntaps",
                description: "(Read-only) number of filter taps",
            },
            Parameter {
                name: "tapsfile",
                description: "filename containing filter taps; writing loads the new file",
            },
        ]
    }

    fn get_parameter(&self, name: &str) -> std::result::Result<String, ParameterError> {
        match name {
            "ntaps" => Ok(self.taps.lock().unwrap().len().to_string()),
            "tapsfile" => Ok(self.taps_file.lock().unwrap().clone()),
            _ => Err(ParameterError::NotFound {
                controllable: "firfilter".into(),
                name: name.into(),
            }),
        }
    }

    fn set_parameter(&self, name: &str, value: &str) -> std::result::Result<(), ParameterError> {
        match name {
            "ntaps" => Err(ParameterError::ReadOnly("ntaps")),
            "tapsfile" => {
                let new_taps = load_taps_file(value).map_err(|e| ParameterError::InvalidValue {
                    name: "tapsfile",
                    value: value.into(),
                    reason: e.to_string(),
                })?;
                // Swap in the whole vector; DSP readers see either
                // the old or the new set.
                *self.taps.lock().unwrap() = new_taps;
                *self.taps_file.lock().unwrap() = value.to_string();
                Ok(())
            }
            _ => Err(ParameterError::NotFound {
                controllable: "firfilter".into(),
                name: name.into(),
            }),
        }
    }
}
