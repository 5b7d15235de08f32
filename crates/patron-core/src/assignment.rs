//! Rectangular minimum-cost linear assignment.
//!
//! Shortest-augmenting-path formulation with dual potentials (the classic
//! O(n²·m) Hungarian variant). Rectangular inputs are handled by always
//! augmenting along the smaller dimension; when there are more rows than
//! columns the matrix is solved transposed and the matching mapped back.

/// Solve the assignment problem for `cost` (row-major, `rows × cols`),
/// minimizing total cost. Returns the assigned column for each row;
/// `None` for rows left unassigned when `rows > cols`.
pub fn solve(cost: &[f32], rows: usize, cols: usize) -> Vec<Option<usize>> {
    assert_eq!(cost.len(), rows * cols, "cost matrix shape mismatch");

    if rows == 0 || cols == 0 {
        return vec![None; rows];
    }

    if rows <= cols {
        solve_wide(&|i, j| cost[i * cols + j], rows, cols)
    } else {
        // Transpose: columns become the augmenting side.
        let by_col = solve_wide(&|i, j| cost[j * cols + i], cols, rows);
        let mut result = vec![None; rows];
        for (col, row) in by_col.into_iter().enumerate() {
            if let Some(r) = row {
                result[r] = Some(col);
            }
        }
        result
    }
}

/// Core solver for `n ≤ m`: every row receives a column.
///
/// Internally 1-indexed with a sentinel row/column 0, following the
/// standard potentials formulation. `u`/`v` are the dual variables,
/// `matched_row[j]` is the row currently matched to column `j`, and
/// `way[j]` records the alternating path for augmentation.
fn solve_wide(cost: &dyn Fn(usize, usize) -> f32, n: usize, m: usize) -> Vec<Option<usize>> {
    let mut u = vec![0.0f32; n + 1];
    let mut v = vec![0.0f32; m + 1];
    let mut matched_row = vec![0usize; m + 1];
    let mut way = vec![0usize; m + 1];

    for i in 1..=n {
        matched_row[0] = i;
        let mut j0 = 0usize;
        let mut min_slack = vec![f32::INFINITY; m + 1];
        let mut used = vec![false; m + 1];

        loop {
            used[j0] = true;
            let i0 = matched_row[j0];
            let mut delta = f32::INFINITY;
            let mut j1 = 0usize;

            for j in 1..=m {
                if used[j] {
                    continue;
                }
                let reduced = cost(i0 - 1, j - 1) - u[i0] - v[j];
                if reduced < min_slack[j] {
                    min_slack[j] = reduced;
                    way[j] = j0;
                }
                if min_slack[j] < delta {
                    delta = min_slack[j];
                    j1 = j;
                }
            }

            for j in 0..=m {
                if used[j] {
                    u[matched_row[j]] += delta;
                    v[j] -= delta;
                } else {
                    min_slack[j] -= delta;
                }
            }

            j0 = j1;
            if matched_row[j0] == 0 {
                break;
            }
        }

        // Augment along the alternating path back to the sentinel.
        loop {
            let j1 = way[j0];
            matched_row[j0] = matched_row[j1];
            j0 = j1;
            if j0 == 0 {
                break;
            }
        }
    }

    let mut result = vec![None; n];
    for j in 1..=m {
        if matched_row[j] > 0 {
            result[matched_row[j] - 1] = Some(j - 1);
        }
    }
    result
}
