//! Symbolic factorization: fill-in, row patterns and dependency lists.
//!
//! Runs once when a plan is generated, so it favours clarity over speed.

use super::pattern::{NaturalEntry, Source};
use super::{Dependency, RowEntry};
use std::collections::BTreeSet;

/// Structure of `L` for one permuted pattern.
pub(crate) struct Symbolic {
    /// Coefficient sources: `n` diagonal slots, then one per `L` position
    pub sources: Vec<Source>,
    pub l_col_ptr: Vec<usize>,
    pub l_rows: Vec<usize>,
    pub row_ptr: Vec<usize>,
    pub row_entries: Vec<RowEntry>,
    pub dep_ptr: Vec<usize>,
    pub deps: Vec<Dependency>,
    /// Structural lower nonzeros (incl. diagonal) before fill-in
    pub kkt_lower_nnz: usize,
}

pub(crate) fn analyze(n: usize, perm_inv: &[usize], entries: &[NaturalEntry]) -> Symbolic {
    // Permuted lower triangle, grouped by elimination column
    let mut diag_sources = vec![Source::Zero; n];
    let mut lower: Vec<Vec<(usize, Source)>> = vec![Vec::new(); n];
    for e in entries {
        let r = perm_inv[e.row];
        let c = perm_inv[e.col];
        if r == c {
            diag_sources[r] = e.source;
        } else {
            lower[r.min(c)].push((r.max(c), e.source));
        }
    }
    for col in lower.iter_mut() {
        col.sort_by_key(|&(row, _)| row);
    }
    let kkt_lower_nnz = n + lower.iter().map(Vec::len).sum::<usize>();

    // Column patterns via the elimination tree: a column inherits the
    // patterns of its children below itself.
    let mut cols: Vec<Vec<usize>> = Vec::with_capacity(n);
    let mut children: Vec<Vec<usize>> = vec![Vec::new(); n];
    for j in 0..n {
        let mut set: BTreeSet<usize> = lower[j].iter().map(|&(row, _)| row).collect();
        for &child in &children[j] {
            set.extend(cols[child].iter().copied().filter(|&row| row > j));
        }
        let pattern: Vec<usize> = set.into_iter().collect();
        if let Some(&parent) = pattern.first() {
            children[parent].push(j);
        }
        cols.push(pattern);
    }

    // Flatten L column-major and attach sources
    let mut l_col_ptr = Vec::with_capacity(n + 1);
    let mut l_rows = Vec::new();
    let mut sources = diag_sources;
    l_col_ptr.push(0);
    for (j, pattern) in cols.iter().enumerate() {
        for &row in pattern {
            let source = lower[j]
                .binary_search_by_key(&row, |&(r, _)| r)
                .map(|idx| lower[j][idx].1)
                .unwrap_or(Source::Zero);
            l_rows.push(row);
            sources.push(source);
        }
        l_col_ptr.push(l_rows.len());
    }

    // Row patterns, ascending column within each row
    let mut rows: Vec<Vec<RowEntry>> = vec![Vec::new(); n];
    for col in 0..n {
        for pos in l_col_ptr[col]..l_col_ptr[col + 1] {
            rows[l_rows[pos]].push(RowEntry { col, pos });
        }
    }

    // deps(k, i) = { j < i : L[k,j] != 0 and L[i,j] != 0 }
    let mut dep_ptr = Vec::with_capacity(l_rows.len() + 1);
    let mut deps = Vec::new();
    dep_ptr.push(0);
    for i in 0..n {
        for pos in l_col_ptr[i]..l_col_ptr[i + 1] {
            let k = l_rows[pos];
            intersect_rows(&rows[k], &rows[i], i, &mut deps);
            dep_ptr.push(deps.len());
        }
    }

    let mut row_ptr = Vec::with_capacity(n + 1);
    let mut row_entries = Vec::with_capacity(l_rows.len());
    row_ptr.push(0);
    for row in rows {
        row_entries.extend(row);
        row_ptr.push(row_entries.len());
    }

    Symbolic {
        sources,
        l_col_ptr,
        l_rows,
        row_ptr,
        row_entries,
        dep_ptr,
        deps,
        kkt_lower_nnz,
    }
}

/// Merge two ascending row patterns, keeping common columns below `limit`.
fn intersect_rows(row_k: &[RowEntry], row_i: &[RowEntry], limit: usize, out: &mut Vec<Dependency>) {
    let (mut a, mut b) = (0, 0);
    while a < row_k.len() && b < row_i.len() {
        let (ca, cb) = (row_k[a].col, row_i[b].col);
        if ca >= limit || cb >= limit {
            break;
        }
        match ca.cmp(&cb) {
            std::cmp::Ordering::Less => a += 1,
            std::cmp::Ordering::Greater => b += 1,
            std::cmp::Ordering::Equal => {
                out.push(Dependency { pos: row_k[a].pos, pivot: ca });
                a += 1;
                b += 1;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(row: usize, col: usize) -> NaturalEntry {
        NaturalEntry { row, col, source: Source::Constant(1.0) }
    }

    #[test]
    fn test_arrow_fill() {
        // Arrow pointing up-left: column 0 couples with every row, so
        // eliminating it first fills the whole trailing block.
        let n = 4;
        let mut entries: Vec<_> = (0..n).map(|i| entry(i, i)).collect();
        entries.extend((1..n).map(|i| entry(i, 0)));
        let identity: Vec<usize> = (0..n).collect();

        let sym = analyze(n, &identity, &entries);
        assert_eq!(sym.kkt_lower_nnz, 7);
        // 3 original + 3 fill-in
        assert_eq!(sym.l_rows.len(), 6);
        assert_eq!(sym.sources.len(), n + 6);
        let fill = sym.sources[n..].iter().filter(|s| **s == Source::Zero).count();
        assert_eq!(fill, 3);

        // L[3,2] depends on pivots 0 and 1
        let pos_32 = sym.l_col_ptr[2];
        assert_eq!(sym.l_rows[pos_32], 3);
        let pivots: Vec<usize> = sym.deps[sym.dep_ptr[pos_32]..sym.dep_ptr[pos_32 + 1]]
            .iter()
            .map(|d| d.pivot)
            .collect();
        assert_eq!(pivots, vec![0, 1]);
    }

    #[test]
    fn test_arrow_reversed_has_no_fill() {
        // Same matrix with the hub eliminated last
        let n = 4;
        let mut entries: Vec<_> = (0..n).map(|i| entry(i, i)).collect();
        entries.extend((1..n).map(|i| entry(i, 0)));
        let perm_inv = vec![3, 0, 1, 2];

        let sym = analyze(n, &perm_inv, &entries);
        assert_eq!(sym.l_rows.len(), 3);
        assert!(sym.deps.is_empty());
        assert!(sym.sources[n..].iter().all(|s| *s != Source::Zero));
    }

    #[test]
    fn test_row_patterns_match_columns() {
        let n = 5;
        let mut entries: Vec<_> = (0..n).map(|i| entry(i, i)).collect();
        entries.extend([entry(2, 0), entry(4, 0), entry(3, 1), entry(4, 3)]);
        let identity: Vec<usize> = (0..n).collect();
        let sym = analyze(n, &identity, &entries);

        for k in 0..n {
            let row = &sym.row_entries[sym.row_ptr[k]..sym.row_ptr[k + 1]];
            assert!(row.windows(2).all(|w| w[0].col < w[1].col));
            for e in row {
                assert_eq!(sym.l_rows[e.pos], k);
                assert!(e.col < k);
            }
        }
        assert_eq!(sym.row_entries.len(), sym.l_rows.len());
    }
}
