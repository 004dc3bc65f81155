//! 移动编译器：把「当前顺序 -> 目标顺序」翻译成远端可执行的区间移动序列
//!
//! 做法：
//! 1. 把当前序列切成若干「块」：在当前与目标中都连续且相对顺序一致的最长片段；
//! 2. 反复选出最长的块作为锚点（等长取最靠前的），只接受与已选锚点相对顺序一致的块；
//! 3. 其余块按目标位置升序逐个移动到其目标前驱之后（目标首块移到最前）。
//!
//! 每一步都在模拟序列上执行并重新计算下标，与远端「移动前下标」语义一致。

use std::collections::HashMap;

use thiserror::Error;

use super::model::{MoveOperation, TrackId};
use super::validate::check_permutation;
use crate::core::ReorderError;

/// 移动参数越界或插入点落在被移动区间内部
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("invalid move ({op}) for a sequence of {len} tracks")]
pub struct InvalidMove {
    pub op: MoveOperation,
    pub len: usize,
}

/// 按远端语义在本地序列上执行一次移动
pub fn apply_move<T>(seq: &mut Vec<T>, op: &MoveOperation) -> Result<(), InvalidMove> {
    let len = seq.len();
    let invalid = || InvalidMove { op: *op, len };

    let end = op
        .range_start
        .checked_add(op.range_length)
        .ok_or_else(invalid)?;
    if op.range_length == 0 || end > len || op.insert_before > len {
        return Err(invalid());
    }
    if op.insert_before > op.range_start && op.insert_before < end {
        return Err(invalid());
    }
    if op.insert_before == op.range_start || op.insert_before == end {
        return Ok(());
    }

    let moved: Vec<T> = seq.drain(op.range_start..end).collect();
    let at = if op.insert_before > op.range_start {
        op.insert_before - op.range_length
    } else {
        op.insert_before
    };
    seq.splice(at..at, moved);
    Ok(())
}

/// 依次执行一组移动
pub fn apply_moves<T>(seq: &mut Vec<T>, ops: &[MoveOperation]) -> Result<(), InvalidMove> {
    for op in ops {
        apply_move(seq, op)?;
    }
    Ok(())
}

#[derive(Debug, Clone, Copy)]
struct Block {
    cur_start: usize,
    des_start: usize,
    len: usize,
}

/// 计算把 current 变为 desired 的区间移动序列；两者必须是同一 id 集合的排列
pub fn compile_moves(
    current: &[TrackId],
    desired: &[TrackId],
) -> Result<Vec<MoveOperation>, ReorderError> {
    check_permutation(current, desired)?;
    if current.is_empty() {
        return Ok(Vec::new());
    }

    let desired_pos: HashMap<&str, usize> = desired
        .iter()
        .enumerate()
        .map(|(i, id)| (id.as_str(), i))
        .collect();
    let positions: Vec<usize> = current
        .iter()
        .map(|id| desired_pos.get(id.as_str()).copied())
        .collect::<Option<Vec<_>>>()
        .ok_or_else(|| ReorderError::Internal("desired index lookup failed".to_string()))?;

    let blocks = split_blocks(&positions);
    let anchored = select_anchors(&blocks);

    let mut pending: Vec<Block> = blocks
        .iter()
        .zip(&anchored)
        .filter(|(_, is_anchor)| !**is_anchor)
        .map(|(b, _)| *b)
        .collect();
    pending.sort_by_key(|b| b.des_start);

    let mut sim: Vec<&str> = current.iter().map(String::as_str).collect();
    let mut moves = Vec::with_capacity(pending.len());

    for block in pending {
        let range_start = index_of(&sim, &desired[block.des_start])?;
        let insert_before = if block.des_start == 0 {
            0
        } else {
            index_of(&sim, &desired[block.des_start - 1])? + 1
        };
        if insert_before == range_start {
            continue;
        }

        let op = MoveOperation {
            range_start,
            range_length: block.len,
            insert_before,
        };
        apply_move(&mut sim, &op)?;
        tracing::trace!(%op, "compiled move");
        moves.push(op);
    }

    if sim.iter().zip(desired).any(|(a, b)| *a != b.as_str()) {
        return Err(ReorderError::Internal(
            "simulated moves did not reproduce the desired order".to_string(),
        ));
    }

    Ok(moves)
}

fn index_of(sim: &[&str], id: &str) -> Result<usize, ReorderError> {
    sim.iter()
        .position(|x| *x == id)
        .ok_or_else(|| ReorderError::Internal(format!("track {id} vanished during simulation")))
}

/// 切块：当前序列中目标位置连续递增的最长片段
fn split_blocks(positions: &[usize]) -> Vec<Block> {
    let mut blocks: Vec<Block> = Vec::new();
    for (i, &pos) in positions.iter().enumerate() {
        match blocks.last_mut() {
            Some(last) if last.des_start + last.len == pos => last.len += 1,
            _ => blocks.push(Block {
                cur_start: i,
                des_start: pos,
                len: 1,
            }),
        }
    }
    blocks
}

/// 贪心选锚：长度降序、当前位置升序；与所有已选锚点在两侧相对顺序一致才接受
fn select_anchors(blocks: &[Block]) -> Vec<bool> {
    let mut order: Vec<usize> = (0..blocks.len()).collect();
    order.sort_by(|&a, &b| {
        blocks[b]
            .len
            .cmp(&blocks[a].len)
            .then(blocks[a].cur_start.cmp(&blocks[b].cur_start))
    });

    let mut anchored = vec![false; blocks.len()];
    let mut chosen: Vec<Block> = Vec::new();
    for idx in order {
        let candidate = blocks[idx];
        let consistent = chosen.iter().all(|a| {
            (a.cur_start < candidate.cur_start) == (a.des_start < candidate.des_start)
        });
        if consistent {
            anchored[idx] = true;
            chosen.push(candidate);
        }
    }
    anchored
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reorder::OrderingViolation;

    fn ids(v: &[&str]) -> Vec<TrackId> {
        v.iter().map(|s| s.to_string()).collect()
    }

    fn replay(current: &[TrackId], ops: &[MoveOperation]) -> Vec<TrackId> {
        let mut seq = current.to_vec();
        apply_moves(&mut seq, ops).unwrap();
        seq
    }

    fn permutations(items: &[TrackId]) -> Vec<Vec<TrackId>> {
        if items.len() <= 1 {
            return vec![items.to_vec()];
        }
        let mut out = Vec::new();
        for i in 0..items.len() {
            let mut rest = items.to_vec();
            let head = rest.remove(i);
            for mut tail in permutations(&rest) {
                tail.insert(0, head.clone());
                out.push(tail);
            }
        }
        out
    }

    #[test]
    fn test_identity_needs_no_moves() {
        let current = ids(&["A", "B", "C", "D", "E"]);
        assert!(compile_moves(&current, &current).unwrap().is_empty());
    }

    #[test]
    fn test_rotate_last_to_front() {
        let current = ids(&["A", "B", "C", "D"]);
        let desired = ids(&["D", "A", "B", "C"]);
        let moves = compile_moves(&current, &desired).unwrap();
        assert_eq!(
            moves,
            vec![MoveOperation {
                range_start: 3,
                range_length: 1,
                insert_before: 0
            }]
        );
    }

    #[test]
    fn test_reverse_three() {
        let current = ids(&["A", "B", "C"]);
        let desired = ids(&["C", "B", "A"]);
        let moves = compile_moves(&current, &desired).unwrap();
        assert!(moves.len() <= 2);
        assert_eq!(replay(&current, &moves), desired);
    }

    #[test]
    fn test_block_moves_as_one_range() {
        let current = ids(&["A", "B", "C", "D", "E", "F"]);
        let desired = ids(&["A", "E", "F", "B", "C", "D"]);
        let moves = compile_moves(&current, &desired).unwrap();
        assert_eq!(moves.len(), 1);
        assert_eq!(moves[0].range_length, 2);
        assert_eq!(replay(&current, &moves), desired);
    }

    #[test]
    fn test_forward_move_index_semantics() {
        let current = ids(&["A", "B", "C", "D"]);
        let desired = ids(&["B", "C", "D", "A"]);
        let moves = compile_moves(&current, &desired).unwrap();
        assert_eq!(
            moves,
            vec![MoveOperation {
                range_start: 0,
                range_length: 1,
                insert_before: 4
            }]
        );
    }

    #[test]
    fn test_round_trip_all_small_permutations() {
        for n in 0..=6 {
            let current: Vec<TrackId> = (0..n).map(|i| format!("t{i}")).collect();
            for desired in permutations(&current) {
                let moves = compile_moves(&current, &desired).unwrap();
                assert_eq!(replay(&current, &moves), desired, "current={current:?}");
                if n > 0 {
                    assert!(moves.len() < n);
                }
                assert_eq!(compile_moves(&current, &desired).unwrap(), moves);
            }
        }
    }

    #[test]
    fn test_round_trip_from_shuffled_start() {
        let current = ids(&["e", "a", "d", "b", "c"]);
        for desired in permutations(&current) {
            let moves = compile_moves(&current, &desired).unwrap();
            assert_eq!(replay(&current, &moves), desired);
        }
    }

    #[test]
    fn test_rejects_non_permutations() {
        let current = ids(&["A", "B", "C"]);
        assert!(matches!(
            compile_moves(&current, &ids(&["A", "B"])),
            Err(ReorderError::InvalidOrdering(OrderingViolation::Missing(_)))
        ));
        assert!(matches!(
            compile_moves(&current, &ids(&["A", "B", "B"])),
            Err(ReorderError::InvalidOrdering(OrderingViolation::Duplicate(_)))
        ));
        assert!(matches!(
            compile_moves(&current, &ids(&["A", "B", "Z"])),
            Err(ReorderError::InvalidOrdering(OrderingViolation::Unknown(_)))
        ));
    }

    #[test]
    fn test_apply_move_rejects_bad_ranges() {
        let mut seq = vec![1, 2, 3, 4];
        let inside = MoveOperation {
            range_start: 0,
            range_length: 3,
            insert_before: 2,
        };
        assert!(apply_move(&mut seq, &inside).is_err());
        let past_end = MoveOperation {
            range_start: 3,
            range_length: 2,
            insert_before: 0,
        };
        assert!(apply_move(&mut seq, &past_end).is_err());
        assert_eq!(seq, vec![1, 2, 3, 4]);
    }

    #[test]
    fn test_apply_move_backward_and_forward() {
        let mut seq = vec!['a', 'b', 'c', 'd', 'e'];
        apply_move(
            &mut seq,
            &MoveOperation {
                range_start: 3,
                range_length: 2,
                insert_before: 1,
            },
        )
        .unwrap();
        assert_eq!(seq, vec!['a', 'd', 'e', 'b', 'c']);

        apply_move(
            &mut seq,
            &MoveOperation {
                range_start: 0,
                range_length: 2,
                insert_before: 5,
            },
        )
        .unwrap();
        assert_eq!(seq, vec!['e', 'b', 'c', 'a', 'd']);
    }
}
