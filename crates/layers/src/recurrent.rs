//! Bidirectional recurrent encoding with padding-aware steps.
//!
//! Inputs are shaped `(batch, steps, input_dim)` and outputs
//! `(batch, steps, 2 * hidden_dim)`: forward states fill the first half of the
//! feature axis and backward states the second half. The full per-step
//! sequence is returned, never just the final state.
//!
//! When a mask `(batch, steps)` is supplied, a direction keeps its previous
//! state at every masked step and emits that carried state as the step output.
//! For trailing padding this means the forward pass repeats the last real
//! state while the backward pass stays at its zero initial state until it
//! reaches real content. Cell internals come from [`candle_nn::rnn`].

use candle_core::{bail, IndexOp, Result, Tensor, D};
use candle_nn::{
    rnn::{GRUConfig, GRUState, LSTMConfig, LSTMState, GRU, LSTM, RNN},
    VarBuilder,
};
use serde::{Deserialize, Serialize};

use crate::checks;

/// Recurrent cell used by both directions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecurrentKind {
    /// Gated recurrent unit.
    #[default]
    Gru,
    /// Long short-term memory.
    Lstm,
}

/// Static description of a bidirectional encoder.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BidirectionalConfig {
    pub kind: RecurrentKind,
    pub input_dim: usize,
    /// Hidden size per direction.
    pub hidden_dim: usize,
}

impl BidirectionalConfig {
    pub fn new(kind: RecurrentKind, input_dim: usize, hidden_dim: usize) -> Self {
        Self {
            kind,
            input_dim,
            hidden_dim,
        }
    }

    /// Width of the concatenated output.
    pub fn output_dim(&self) -> usize {
        2 * self.hidden_dim
    }
}

#[derive(Debug, Clone)]
enum Cell {
    Gru(GRU),
    Lstm(LSTM),
}

#[derive(Debug, Clone)]
enum CellState {
    Gru(GRUState),
    Lstm(LSTMState),
}

impl Cell {
    fn new(config: &BidirectionalConfig, vb: VarBuilder) -> Result<Self> {
        match config.kind {
            RecurrentKind::Gru => Ok(Cell::Gru(candle_nn::rnn::gru(
                config.input_dim,
                config.hidden_dim,
                GRUConfig::default(),
                vb,
            )?)),
            RecurrentKind::Lstm => Ok(Cell::Lstm(candle_nn::rnn::lstm(
                config.input_dim,
                config.hidden_dim,
                LSTMConfig::default(),
                vb,
            )?)),
        }
    }

    fn zero_state(&self, batch: usize) -> Result<CellState> {
        match self {
            Cell::Gru(cell) => Ok(CellState::Gru(cell.zero_state(batch)?)),
            Cell::Lstm(cell) => Ok(CellState::Lstm(cell.zero_state(batch)?)),
        }
    }

    fn step(&self, input: &Tensor, state: &CellState) -> Result<CellState> {
        match (self, state) {
            (Cell::Gru(cell), CellState::Gru(state)) => Ok(CellState::Gru(cell.step(input, state)?)),
            (Cell::Lstm(cell), CellState::Lstm(state)) => {
                Ok(CellState::Lstm(cell.step(input, state)?))
            }
            _ => bail!("recurrent cell received a state of another cell kind"),
        }
    }
}

impl CellState {
    fn h(&self) -> &Tensor {
        match self {
            CellState::Gru(state) => &state.h,
            CellState::Lstm(state) => &state.h,
        }
    }

    /// Keeps `self` where `keep == 1` and `previous` where `keep == 0`.
    ///
    /// `keep` is shaped `(batch, 1)` and broadcast over the hidden axis.
    fn blend(self, previous: &CellState, keep: &Tensor) -> Result<CellState> {
        let drop = keep.affine(-1.0, 1.0)?;
        let mix = |next: &Tensor, prev: &Tensor| -> Result<Tensor> {
            next.broadcast_mul(keep)?.add(&prev.broadcast_mul(&drop)?)
        };
        match (self, previous) {
            (CellState::Gru(next), CellState::Gru(prev)) => Ok(CellState::Gru(GRUState {
                h: mix(&next.h, &prev.h)?,
            })),
            (CellState::Lstm(next), CellState::Lstm(prev)) => Ok(CellState::Lstm(LSTMState {
                h: mix(&next.h, &prev.h)?,
                c: mix(&next.c, &prev.c)?,
            })),
            _ => bail!("cannot blend states of different cell kinds"),
        }
    }
}

/// Runs one cell left-to-right and an independent cell right-to-left.
#[derive(Debug, Clone)]
pub struct Bidirectional {
    config: BidirectionalConfig,
    forward: Cell,
    backward: Cell,
}

impl Bidirectional {
    /// Creates both directions under `vb.pp("forward")` and `vb.pp("backward")`.
    pub fn new(config: BidirectionalConfig, vb: VarBuilder) -> Result<Self> {
        if config.input_dim == 0 || config.hidden_dim == 0 {
            bail!(
                "bidirectional encoder requires non-zero sizes, got input_dim={} hidden_dim={}",
                config.input_dim,
                config.hidden_dim
            );
        }
        let forward = Cell::new(&config, vb.pp("forward"))?;
        let backward = Cell::new(&config, vb.pp("backward"))?;
        Ok(Self {
            config,
            forward,
            backward,
        })
    }

    pub fn config(&self) -> &BidirectionalConfig {
        &self.config
    }

    pub fn output_dim(&self) -> usize {
        self.config.output_dim()
    }

    /// Encodes `input` and returns the concatenated per-step states.
    pub fn forward(&self, input: &Tensor, mask: Option<&Tensor>) -> Result<Tensor> {
        checks::expect_batch_seq_hidden("bidirectional.input", input, self.config.input_dim)?;
        let (batch, steps, _) = input.dims3()?;
        let keep = match mask {
            Some(mask) => {
                checks::expect_shape("bidirectional.mask", mask, &[batch, steps])?;
                Some(mask.to_dtype(input.dtype())?)
            }
            None => None,
        };

        let forward = run_direction(&self.forward, input, keep.as_ref(), false)?;
        let backward = run_direction(&self.backward, input, keep.as_ref(), true)?;
        Tensor::cat(&[&forward, &backward], D::Minus1)
    }
}

fn run_direction(
    cell: &Cell,
    input: &Tensor,
    keep: Option<&Tensor>,
    reverse: bool,
) -> Result<Tensor> {
    let (batch, steps, _) = input.dims3()?;
    let mut state = cell.zero_state(batch)?;
    let order: Vec<usize> = if reverse {
        (0..steps).rev().collect()
    } else {
        (0..steps).collect()
    };

    let mut outputs: Vec<Option<Tensor>> = vec![None; steps];
    for t in order {
        let x_t = input.i((.., t))?.contiguous()?;
        let next = cell.step(&x_t, &state)?;
        state = match keep {
            Some(keep) => {
                let keep_t = keep.i((.., t))?.unsqueeze(1)?;
                next.blend(&state, &keep_t)?
            }
            None => next,
        };
        outputs[t] = Some(state.h().clone());
    }

    let outputs: Vec<Tensor> = outputs.into_iter().flatten().collect();
    Tensor::stack(&outputs, 1)
}
