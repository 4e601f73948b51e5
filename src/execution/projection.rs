use std::cmp::Ordering;

use crate::catalog::data_type::{compare_column, ColType, Value};
use crate::error::{MicaError, MicaResult};
use crate::execution::{find_col, ExecutionContext, OutputCol, Tuple, VolcanoExecutor};
use crate::sql::{AggFunc, AggSpec, TabCol};

enum AggState {
    Count(u64),
    SumInt(i64),
    SumFloat(f64),
    /// Best encoded value seen so far, compared by column type.
    Extreme {
        best: Option<Vec<u8>>,
        want_max: bool,
    },
}

struct AggSlot {
    state: AggState,
    src: Option<OutputCol>,
    out_type: ColType,
    out_len: u32,
}

/// Column projection, an optional single-pass aggregation, and LIMIT.
/// With aggregates the child is drained once and a single row comes out.
pub struct ProjectionExecutor {
    child: Box<dyn VolcanoExecutor>,
    cols: Vec<OutputCol>,
    /// Source columns for plain projection; None passes tuples through.
    sel: Option<Vec<OutputCol>>,
    aggs: Vec<AggSlot>,
    limit: Option<usize>,
    emitted: usize,
    agg_done: bool,
}

impl ProjectionExecutor {
    pub fn new(
        child: Box<dyn VolcanoExecutor>,
        cols: &[TabCol],
        aggs: Vec<AggSpec>,
        limit: Option<usize>,
    ) -> MicaResult<Self> {
        if !aggs.is_empty() {
            let mut out_cols = Vec::with_capacity(aggs.len());
            let mut slots = Vec::with_capacity(aggs.len());
            let mut offset = 0u32;
            for agg in &aggs {
                let src = match &agg.col {
                    Some(col) => Some(find_col(child.output_cols(), col)?.clone()),
                    None => None,
                };
                let (out_type, out_len, state) = match agg.func {
                    AggFunc::Count => (ColType::Int, 4, AggState::Count(0)),
                    AggFunc::Sum => {
                        let src = src.as_ref().ok_or_else(|| {
                            MicaError::Internal("SUM needs a column".to_string())
                        })?;
                        match src.col_type {
                            ColType::Int | ColType::BigInt => {
                                (src.col_type, src.len, AggState::SumInt(0))
                            }
                            ColType::Float => (ColType::Float, 4, AggState::SumFloat(0.0)),
                            other => {
                                return Err(MicaError::IncompatibleType {
                                    expected: "a numeric column".to_string(),
                                    actual: other.name().to_string(),
                                })
                            }
                        }
                    }
                    AggFunc::Max | AggFunc::Min => {
                        let src = src.as_ref().ok_or_else(|| {
                            MicaError::Internal("MAX/MIN need a column".to_string())
                        })?;
                        (
                            src.col_type,
                            src.len,
                            AggState::Extreme {
                                best: None,
                                want_max: agg.func == AggFunc::Max,
                            },
                        )
                    }
                };
                out_cols.push(OutputCol {
                    table: String::new(),
                    name: agg.alias.clone(),
                    col_type: out_type,
                    len: out_len,
                    offset,
                });
                offset += out_len;
                slots.push(AggSlot {
                    state,
                    src,
                    out_type,
                    out_len,
                });
            }
            return Ok(Self {
                child,
                cols: out_cols,
                sel: None,
                aggs: slots,
                limit,
                emitted: 0,
                agg_done: false,
            });
        }

        if cols.is_empty() {
            // SELECT *: pass the child tuples through untouched.
            let out_cols = child.output_cols().to_vec();
            return Ok(Self {
                child,
                cols: out_cols,
                sel: None,
                aggs: Vec::new(),
                limit,
                emitted: 0,
                agg_done: false,
            });
        }

        let mut out_cols = Vec::with_capacity(cols.len());
        let mut sel = Vec::with_capacity(cols.len());
        let mut offset = 0u32;
        for col in cols {
            let src = find_col(child.output_cols(), col)?.clone();
            out_cols.push(OutputCol {
                table: src.table.clone(),
                name: src.name.clone(),
                col_type: src.col_type,
                len: src.len,
                offset,
            });
            offset += src.len;
            sel.push(src);
        }
        Ok(Self {
            child,
            cols: out_cols,
            sel: Some(sel),
            aggs: Vec::new(),
            limit,
            emitted: 0,
            agg_done: false,
        })
    }

    fn feed_aggregates(&mut self, data: &[u8]) -> MicaResult<()> {
        for slot in self.aggs.iter_mut() {
            let src_slice = slot
                .src
                .as_ref()
                .map(|src| &data[src.offset as usize..(src.offset + src.len) as usize]);
            match &mut slot.state {
                AggState::Count(n) => *n += 1,
                AggState::SumInt(acc) => {
                    let slice = src_slice.expect("SUM source resolved at build");
                    let add = match Value::decode(slice, slot.out_type) {
                        Value::Int(v) => v as i64,
                        Value::BigInt(v) => v,
                        _ => 0,
                    };
                    *acc += add;
                }
                AggState::SumFloat(acc) => {
                    let slice = src_slice.expect("SUM source resolved at build");
                    if let Value::Float(v) = Value::decode(slice, ColType::Float) {
                        *acc += v as f64;
                    }
                }
                AggState::Extreme { best, want_max } => {
                    let slice = src_slice.expect("MAX/MIN source resolved at build");
                    let replace = match best {
                        None => true,
                        Some(current) => {
                            let ord = compare_column(slice, current, slot.out_type);
                            if *want_max {
                                ord == Ordering::Greater
                            } else {
                                ord == Ordering::Less
                            }
                        }
                    };
                    if replace {
                        *best = Some(slice.to_vec());
                    }
                }
            }
        }
        Ok(())
    }

    fn finalize_aggregates(&self) -> MicaResult<Tuple> {
        let mut data = Vec::new();
        for slot in &self.aggs {
            match &slot.state {
                AggState::Count(n) => {
                    data.extend_from_slice(&Value::Int(*n as i32).encode(4)?);
                }
                AggState::SumInt(acc) => match slot.out_type {
                    ColType::Int => data.extend_from_slice(&Value::Int(*acc as i32).encode(4)?),
                    _ => data.extend_from_slice(&Value::BigInt(*acc).encode(8)?),
                },
                AggState::SumFloat(acc) => {
                    data.extend_from_slice(&Value::Float(*acc as f32).encode(4)?);
                }
                AggState::Extreme { best, .. } => match best {
                    Some(bytes) => data.extend_from_slice(bytes),
                    None => data.extend_from_slice(&vec![0u8; slot.out_len as usize]),
                },
            }
        }
        Ok(Tuple { data, rid: None })
    }
}

impl VolcanoExecutor for ProjectionExecutor {
    fn init(&mut self, ctx: &mut ExecutionContext) -> MicaResult<()> {
        self.child.init(ctx)?;
        self.emitted = 0;
        self.agg_done = false;
        Ok(())
    }

    fn next(&mut self, ctx: &mut ExecutionContext) -> MicaResult<Option<Tuple>> {
        if !self.aggs.is_empty() {
            if self.agg_done {
                return Ok(None);
            }
            while let Some(tuple) = self.child.next(ctx)? {
                self.feed_aggregates(&tuple.data)?;
            }
            self.agg_done = true;
            return Ok(Some(self.finalize_aggregates()?));
        }

        if let Some(limit) = self.limit {
            if self.emitted >= limit {
                return Ok(None);
            }
        }
        let Some(tuple) = self.child.next(ctx)? else {
            return Ok(None);
        };
        self.emitted += 1;
        match &self.sel {
            None => Ok(Some(tuple)),
            Some(sel) => {
                let mut data = Vec::with_capacity(self.tuple_len() as usize);
                for src in sel {
                    data.extend_from_slice(
                        &tuple.data[src.offset as usize..(src.offset + src.len) as usize],
                    );
                }
                Ok(Some(Tuple {
                    data,
                    rid: tuple.rid,
                }))
            }
        }
    }

    fn output_cols(&self) -> &[OutputCol] {
        &self.cols
    }
}
