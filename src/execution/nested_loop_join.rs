use crate::config::JOIN_BLOCK_SIZE;
use crate::error::MicaResult;
use crate::execution::{eval_conds, ExecutionContext, OutputCol, Tuple, VolcanoExecutor};
use crate::sql::Condition;

/// Block nested-loop join: buffer a block of left tuples, sweep the
/// right side once per block, emit concatenations that satisfy the join
/// predicates. The right child is re-initialised for each block.
pub struct NestedLoopJoinExecutor {
    left: Box<dyn VolcanoExecutor>,
    right: Box<dyn VolcanoExecutor>,
    conds: Vec<Condition>,
    cols: Vec<OutputCol>,
    left_block: Vec<Vec<u8>>,
    left_done: bool,
    right_tuple: Option<Vec<u8>>,
    block_idx: usize,
}

impl NestedLoopJoinExecutor {
    pub fn new(
        left: Box<dyn VolcanoExecutor>,
        right: Box<dyn VolcanoExecutor>,
        conds: Vec<Condition>,
    ) -> Self {
        let left_len = left.tuple_len();
        let mut cols = left.output_cols().to_vec();
        for col in right.output_cols() {
            let mut col = col.clone();
            col.offset += left_len;
            cols.push(col);
        }
        Self {
            left,
            right,
            conds,
            cols,
            left_block: Vec::new(),
            left_done: false,
            right_tuple: None,
            block_idx: 0,
        }
    }

    fn fill_block(&mut self, ctx: &mut ExecutionContext) -> MicaResult<()> {
        self.left_block.clear();
        while self.left_block.len() < JOIN_BLOCK_SIZE {
            match self.left.next(ctx)? {
                Some(tuple) => self.left_block.push(tuple.data),
                None => {
                    self.left_done = true;
                    break;
                }
            }
        }
        Ok(())
    }
}

impl VolcanoExecutor for NestedLoopJoinExecutor {
    fn init(&mut self, ctx: &mut ExecutionContext) -> MicaResult<()> {
        self.left.init(ctx)?;
        self.right.init(ctx)?;
        self.left_done = false;
        self.right_tuple = None;
        self.block_idx = 0;
        self.fill_block(ctx)
    }

    fn next(&mut self, ctx: &mut ExecutionContext) -> MicaResult<Option<Tuple>> {
        loop {
            if self.left_block.is_empty() {
                return Ok(None);
            }
            if self.right_tuple.is_none() {
                match self.right.next(ctx)? {
                    Some(tuple) => self.right_tuple = Some(tuple.data),
                    None => {
                        // Right side exhausted: move to the next block.
                        if self.left_done {
                            return Ok(None);
                        }
                        self.fill_block(ctx)?;
                        if self.left_block.is_empty() {
                            return Ok(None);
                        }
                        self.right.init(ctx)?;
                        match self.right.next(ctx)? {
                            Some(tuple) => self.right_tuple = Some(tuple.data),
                            None => return Ok(None),
                        }
                    }
                }
                self.block_idx = 0;
            }

            let right_data = self
                .right_tuple
                .clone()
                .expect("right tuple set just above");
            while self.block_idx < self.left_block.len() {
                let mut combined = self.left_block[self.block_idx].clone();
                combined.extend_from_slice(&right_data);
                self.block_idx += 1;
                if eval_conds(&self.cols, &self.conds, &combined)? {
                    return Ok(Some(Tuple {
                        data: combined,
                        rid: None,
                    }));
                }
            }
            self.right_tuple = None;
        }
    }

    fn output_cols(&self) -> &[OutputCol] {
        &self.cols
    }
}
