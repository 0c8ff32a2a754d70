//! Static dataflow scheduler.
//!
//! Stages come in four arities — input (0→1), codec (1→1), mux
//! (N→1) and output (1→0) — held as a sum type. `connect` keeps the
//! node list topologically ordered by rotating a destination that
//! currently sits before its source; `run` executes every node once
//! in list order, moving buffers across edges and accumulating
//! per-node wall-clock time.
//!
//! Metadata records travel on a parallel lane along the same edges.
//! A pipelined codec that delays samples by d frames must delay its
//! metadata by the same d, via its `process_metadata` hook.

use std::time::{Duration, Instant};

use crate::buffer::Buffer;
use crate::errors::Result;
use crate::eti::timestamp::FrameTimestamp;
use crate::log::Logger;

/// Metadata accompanying one sample buffer.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FrameMetadata {
    pub ts: FrameTimestamp,
}

pub trait ModInput: Send {
    fn name(&self) -> &str;

    /// Produce one frame into `out`; returning 0 ends the pipeline.
    fn process(&mut self, out: &mut Buffer) -> Result<usize>;

    /// Metadata records for the frame just produced.
    fn metadata(&mut self) -> Vec<FrameMetadata> {
        Vec::new()
    }
}

pub trait ModCodec: Send {
    fn name(&self) -> &str;

    fn process(&mut self, input: &Buffer, out: &mut Buffer) -> Result<usize>;

    /// Align metadata with the stage's sample delay; the default is
    /// a passthrough for stages without pipeline delay.
    fn process_metadata(&mut self, meta: &[FrameMetadata]) -> Vec<FrameMetadata> {
        meta.to_vec()
    }
}

pub trait ModMux: Send {
    fn name(&self) -> &str;

    fn process(&mut self, inputs: &[Buffer], out: &mut Buffer) -> Result<usize>;

    fn process_metadata(&mut self, meta: &[FrameMetadata]) -> Vec<FrameMetadata> {
        meta.to_vec()
    }
}

pub trait ModOutput: Send {
    fn name(&self) -> &str;

    fn process(&mut self, input: &Buffer, meta: &[FrameMetadata]) -> Result<usize>;
}

pub enum Stage {
    Input(Box<dyn ModInput>),
    Codec(Box<dyn ModCodec>),
    Mux(Box<dyn ModMux>),
    Output(Box<dyn ModOutput>),
}

impl Stage {
    fn name(&self) -> &str {
        match self {
            Stage::Input(s) => s.name(),
            Stage::Codec(s) => s.name(),
            Stage::Mux(s) => s.name(),
            Stage::Output(s) => s.name(),
        }
    }
}

/// Handle for a node added to a flowgraph.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NodeId(usize);

struct Node {
    id: usize,
    stage: Stage,
    process_time: Duration,
}

struct EdgeSlot {
    src: usize,
    dst: usize,
    buffer: Buffer,
    metadata: Vec<FrameMetadata>,
}

pub struct Flowgraph {
    nodes: Vec<Node>,
    edges: Vec<EdgeSlot>,
    next_id: usize,
    total_time: Duration,
    cancelled: bool,
}

impl Flowgraph {
    pub fn new() -> Self {
        Flowgraph {
            nodes: Vec::new(),
            edges: Vec::new(),
            next_id: 0,
            total_time: Duration::ZERO,
            cancelled: false,
        }
    }

    pub fn add_node(&mut self, stage: Stage) -> NodeId {
        let id = self.next_id;
        self.next_id += 1;
        self.nodes.push(Node {
            id,
            stage,
            process_time: Duration::ZERO,
        });
        NodeId(id)
    }

    /// Connect an output port of `src` to an input port of `dst`,
    /// instantiating the edge buffer. If `dst` currently executes
    /// before `src`, it is rotated to the end of the list.
    pub fn connect(&mut self, src: NodeId, dst: NodeId) {
        let src_pos = self.position(src.0);
        let dst_pos = self.position(dst.0);
        if src_pos > dst_pos {
            let node = self.nodes.remove(dst_pos);
            self.nodes.push(node);
        }
        self.edges.push(EdgeSlot {
            src: src.0,
            dst: dst.0,
            buffer: Buffer::new(),
            metadata: Vec::new(),
        });
    }

    fn position(&self, id: usize) -> usize {
        self.nodes
            .iter()
            .position(|n| n.id == id)
            .expect("node belongs to this flowgraph")
    }

    /// Execution position of a node; exposed for order assertions.
    pub fn execution_index(&self, node: NodeId) -> usize {
        self.position(node.0)
    }

    /// Stop after the current frame.
    pub fn cancel(&mut self) {
        self.cancelled = true;
    }

    /// Execute every node once in list order. Returns Ok(true) to
    /// continue, Ok(false) when the pipeline ends (input exhausted
    /// or cancellation), or the first terminal stage error.
    pub fn run(&mut self) -> Result<bool> {
        if self.cancelled {
            return Ok(false);
        }
        for pos in 0..self.nodes.len() {
            let start = Instant::now();
            let id = self.nodes[pos].id;

            // Move the input buffers and metadata out of the edges.
            let mut inputs = Vec::new();
            let mut meta_in = Vec::new();
            for edge in self.edges.iter_mut().filter(|e| e.dst == id) {
                inputs.push(std::mem::take(&mut edge.buffer));
                meta_in.extend(edge.metadata.drain(..));
            }

            let mut output = Buffer::new();
            let mut meta_out = Vec::new();
            let keep_running = {
                let node = &mut self.nodes[pos];
                match &mut node.stage {
                    Stage::Input(stage) => {
                        let produced = stage.process(&mut output)?;
                        meta_out = stage.metadata();
                        produced > 0
                    }
                    Stage::Codec(stage) => {
                        let input = inputs.first().expect("codec node has one input edge");
                        stage.process(input, &mut output)?;
                        meta_out = stage.process_metadata(&meta_in);
                        true
                    }
                    Stage::Mux(stage) => {
                        stage.process(&inputs, &mut output)?;
                        meta_out = stage.process_metadata(&meta_in);
                        true
                    }
                    Stage::Output(stage) => {
                        let input = inputs.first().expect("output node has one input edge");
                        stage.process(input, &meta_in)?;
                        true
                    }
                }
            };

            // Distribute the output to every out-edge; all but the
            // last receive clones.
            let out_edges: Vec<usize> = self
                .edges
                .iter()
                .enumerate()
                .filter(|(_, e)| e.src == id)
                .map(|(i, _)| i)
                .collect();
            for (n, &ei) in out_edges.iter().enumerate() {
                if n + 1 == out_edges.len() {
                    self.edges[ei].buffer = std::mem::take(&mut output);
                    self.edges[ei].metadata = std::mem::take(&mut meta_out);
                } else {
                    self.edges[ei].buffer = output.clone();
                    self.edges[ei].metadata = meta_out.clone();
                }
            }

            let elapsed = start.elapsed();
            self.nodes[pos].process_time += elapsed;
            self.total_time += elapsed;

            if !keep_running {
                return Ok(false);
            }
        }
        Ok(!self.cancelled)
    }

    /// Per-node processing time shares, logged on shutdown.
    pub fn log_statistics(&self, logger: &Logger) {
        if self.total_time.is_zero() {
            return;
        }
        for node in &self.nodes {
            logger.info(
                "FLOWGRAPH",
                format!(
                    "{:>24}: {:>10} us ({:5.2} %)",
                    node.stage.name(),
                    node.process_time.as_micros(),
                    100.0 * node.process_time.as_secs_f64() / self.total_time.as_secs_f64()
                ),
            );
        }
        logger.info(
            "FLOWGRAPH",
            format!("{:>24}: {:>10} us (100.00 %)", "total", self.total_time.as_micros()),
        );
    }
}

impl Default for Flowgraph {
    fn default() -> Self {
        Flowgraph::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct CountingInput {
        frames: usize,
        produced: usize,
    }

    impl ModInput for CountingInput {
        fn name(&self) -> &str {
            "counting-input"
        }

        fn process(&mut self, out: &mut Buffer) -> Result<usize> {
            if self.produced >= self.frames {
                return Ok(0);
            }
            self.produced += 1;
            out.set_bytes(&[self.produced as u8; 4]);
            Ok(4)
        }

        fn metadata(&mut self) -> Vec<FrameMetadata> {
            let mut ts = FrameTimestamp::zero();
            ts.fct = self.produced as u8;
            vec![FrameMetadata { ts }]
        }
    }

    struct AddOne;

    impl ModCodec for AddOne {
        fn name(&self) -> &str {
            "add-one"
        }

        fn process(&mut self, input: &Buffer, out: &mut Buffer) -> Result<usize> {
            out.set_len(input.len());
            for (o, i) in out.as_bytes_mut().iter_mut().zip(input.as_bytes()) {
                *o = i + 1;
            }
            Ok(out.len())
        }
    }

    /// Delays samples and metadata by one frame.
    struct OneFrameDelay {
        held: Option<Vec<u8>>,
        meta: std::collections::VecDeque<FrameMetadata>,
    }

    impl ModCodec for OneFrameDelay {
        fn name(&self) -> &str {
            "delay"
        }

        fn process(&mut self, input: &Buffer, out: &mut Buffer) -> Result<usize> {
            let prev = self.held.replace(input.as_bytes().to_vec());
            match prev {
                Some(bytes) => out.set_bytes(&bytes),
                None => out.set_len(input.len()),
            }
            Ok(out.len())
        }

        fn process_metadata(&mut self, meta: &[FrameMetadata]) -> Vec<FrameMetadata> {
            self.meta.extend(meta.iter().copied());
            if self.meta.len() > 1 {
                vec![self.meta.pop_front().expect("length checked")]
            } else {
                Vec::new()
            }
        }
    }

    type Seen = std::sync::Arc<std::sync::Mutex<Vec<(Vec<u8>, Vec<u8>)>>>;

    struct Collector {
        seen: Seen,
    }

    impl ModOutput for Collector {
        fn name(&self) -> &str {
            "collector"
        }

        fn process(&mut self, input: &Buffer, meta: &[FrameMetadata]) -> Result<usize> {
            self.seen.lock().unwrap().push((
                input.as_bytes().to_vec(),
                meta.iter().map(|m| m.ts.fct).collect(),
            ));
            Ok(input.len())
        }
    }

    #[test]
    fn test_linear_chain_runs_in_order() {
        let seen: Seen = Default::default();
        let mut fg = Flowgraph::new();
        let input = fg.add_node(Stage::Input(Box::new(CountingInput {
            frames: 3,
            produced: 0,
        })));
        let codec = fg.add_node(Stage::Codec(Box::new(AddOne)));
        let output = fg.add_node(Stage::Output(Box::new(Collector { seen: seen.clone() })));
        fg.connect(input, codec);
        fg.connect(codec, output);

        assert!(fg.run().unwrap());
        assert!(fg.run().unwrap());
        assert!(fg.run().unwrap());
        assert!(!fg.run().unwrap()); // input exhausted

        let seen = seen.lock().unwrap();
        assert_eq!(
            *seen,
            vec![
                (vec![2, 2, 2, 2], vec![1]),
                (vec![3, 3, 3, 3], vec![2]),
                (vec![4, 4, 4, 4], vec![3]),
            ]
        );
    }

    #[test]
    fn test_connect_rotates_destination() {
        let mut fg = Flowgraph::new();
        let b = fg.add_node(Stage::Codec(Box::new(AddOne)));
        let a = fg.add_node(Stage::Input(Box::new(CountingInput {
            frames: 1,
            produced: 0,
        })));
        // b was added first but receives data from a: connect must
        // rotate it after a.
        fg.connect(a, b);
        assert!(fg.execution_index(a) < fg.execution_index(b));
    }

    #[test]
    fn test_every_edge_respects_order_after_connects() {
        let seen: Seen = Default::default();
        let mut fg = Flowgraph::new();
        let n3 = fg.add_node(Stage::Codec(Box::new(AddOne)));
        let n2 = fg.add_node(Stage::Codec(Box::new(AddOne)));
        let n1 = fg.add_node(Stage::Input(Box::new(CountingInput {
            frames: 1,
            produced: 0,
        })));
        let n4 = fg.add_node(Stage::Output(Box::new(Collector { seen })));
        fg.connect(n1, n2);
        fg.connect(n2, n3);
        fg.connect(n3, n4);
        for (src, dst) in [(n1, n2), (n2, n3), (n3, n4)] {
            assert!(fg.execution_index(src) < fg.execution_index(dst));
        }
    }

    #[test]
    fn test_metadata_alignment_with_delayed_codec() {
        let seen: Seen = Default::default();
        let mut fg = Flowgraph::new();
        let input = fg.add_node(Stage::Input(Box::new(CountingInput {
            frames: 4,
            produced: 0,
        })));
        let delay = fg.add_node(Stage::Codec(Box::new(OneFrameDelay {
            held: None,
            meta: std::collections::VecDeque::new(),
        })));
        let output = fg.add_node(Stage::Output(Box::new(Collector { seen: seen.clone() })));
        fg.connect(input, delay);
        fg.connect(delay, output);

        for _ in 0..4 {
            assert!(fg.run().unwrap());
        }

        // Metadata emitted at frame k belongs to the samples
        // generated from the inputs of frame k − 1.
        let seen = seen.lock().unwrap();
        assert_eq!(seen[0], (vec![0, 0, 0, 0], vec![]));
        assert_eq!(seen[1], (vec![1, 1, 1, 1], vec![1]));
        assert_eq!(seen[2], (vec![2, 2, 2, 2], vec![2]));
        assert_eq!(seen[3], (vec![3, 3, 3, 3], vec![3]));
    }

    struct ConcatMux;

    impl ModMux for ConcatMux {
        fn name(&self) -> &str {
            "concat"
        }

        fn process(&mut self, inputs: &[Buffer], out: &mut Buffer) -> Result<usize> {
            out.clear();
            for input in inputs {
                out.append_bytes(input.as_bytes());
            }
            Ok(out.len())
        }
    }

    #[test]
    fn test_mux_combines_two_lanes() {
        let seen: Seen = Default::default();
        let mut fg = Flowgraph::new();
        let in_a = fg.add_node(Stage::Input(Box::new(CountingInput {
            frames: 1,
            produced: 0,
        })));
        let in_b = fg.add_node(Stage::Input(Box::new(CountingInput {
            frames: 1,
            produced: 0,
        })));
        let mux = fg.add_node(Stage::Mux(Box::new(ConcatMux)));
        let output = fg.add_node(Stage::Output(Box::new(Collector { seen: seen.clone() })));
        fg.connect(in_a, mux);
        fg.connect(in_b, mux);
        fg.connect(mux, output);

        assert!(fg.run().unwrap());
        let seen = seen.lock().unwrap();
        assert_eq!(seen[0].0, vec![1, 1, 1, 1, 1, 1, 1, 1]);
        // Metadata from both lanes is concatenated in lane order.
        assert_eq!(seen[0].1, vec![1, 1]);
    }

    #[test]
    fn test_cancellation_stops_pipeline() {
        let seen: Seen = Default::default();
        let mut fg = Flowgraph::new();
        let input = fg.add_node(Stage::Input(Box::new(CountingInput {
            frames: 100,
            produced: 0,
        })));
        let output = fg.add_node(Stage::Output(Box::new(Collector { seen })));
        fg.connect(input, output);
        assert!(fg.run().unwrap());
        fg.cancel();
        assert!(!fg.run().unwrap());
    }
}
