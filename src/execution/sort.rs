use std::cmp::Ordering;

use crate::catalog::data_type::{compare_column, ColType};
use crate::error::MicaResult;
use crate::execution::{find_col, ExecutionContext, OutputCol, Tuple, VolcanoExecutor};
use crate::sql::TabCol;

struct SortKey {
    offset: u32,
    len: u32,
    col_type: ColType,
    asc: bool,
}

/// Full in-memory sort: materialise the child, order by the key columns
/// with per-column direction, then drain.
pub struct SortExecutor {
    child: Box<dyn VolcanoExecutor>,
    keys: Vec<SortKey>,
    buffer: Option<Vec<Vec<u8>>>,
    cursor: usize,
}

impl SortExecutor {
    pub fn new(child: Box<dyn VolcanoExecutor>, keys: &[(TabCol, bool)]) -> MicaResult<Self> {
        let resolved = keys
            .iter()
            .map(|(col, asc)| {
                let out = find_col(child.output_cols(), col)?;
                Ok(SortKey {
                    offset: out.offset,
                    len: out.len,
                    col_type: out.col_type,
                    asc: *asc,
                })
            })
            .collect::<MicaResult<Vec<SortKey>>>()?;
        Ok(Self {
            child,
            keys: resolved,
            buffer: None,
            cursor: 0,
        })
    }

    fn compare(&self, a: &[u8], b: &[u8]) -> Ordering {
        for key in &self.keys {
            let range = key.offset as usize..(key.offset + key.len) as usize;
            let ord = compare_column(&a[range.clone()], &b[range], key.col_type);
            let ord = if key.asc { ord } else { ord.reverse() };
            if ord != Ordering::Equal {
                return ord;
            }
        }
        Ordering::Equal
    }
}

impl VolcanoExecutor for SortExecutor {
    fn init(&mut self, ctx: &mut ExecutionContext) -> MicaResult<()> {
        self.child.init(ctx)?;
        self.buffer = None;
        self.cursor = 0;
        Ok(())
    }

    fn next(&mut self, ctx: &mut ExecutionContext) -> MicaResult<Option<Tuple>> {
        if self.buffer.is_none() {
            let mut rows = Vec::new();
            while let Some(tuple) = self.child.next(ctx)? {
                rows.push(tuple.data);
            }
            rows.sort_by(|a, b| self.compare(a, b));
            self.buffer = Some(rows);
        }
        let rows = self.buffer.as_ref().expect("buffer filled above");
        if self.cursor >= rows.len() {
            return Ok(None);
        }
        let data = rows[self.cursor].clone();
        self.cursor += 1;
        Ok(Some(Tuple { data, rid: None }))
    }

    fn output_cols(&self) -> &[OutputCol] {
        self.child.output_cols()
    }
}
