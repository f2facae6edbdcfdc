//! Histogram rendering for sampled maps, in the classic bpf tools style.

use std::fmt::Write as _;

const STARS_MAX: usize = 40;

fn write_stars(out: &mut String, val: u64, val_max: u64, width: usize) {
    let filled = (val.min(val_max) as usize * width) / val_max.max(1) as usize;
    for _ in 0..filled {
        out.push('*');
    }
    for _ in 0..width - filled {
        out.push(' ');
    }
    if val > val_max {
        out.push('+');
    }
}

/// Render a power-of-two bucket histogram. Bucket `i` covers
/// `[2^i - 1, 2^(i+1) - 1]`; the low bound drops by one when the bucket is a
/// single value so ranges read naturally.
pub fn render_log2_hist(out: &mut String, vals: &[u32], unit: &str) {
    let mut idx_max = None;
    let mut val_max = 0u32;
    for (i, &val) in vals.iter().enumerate() {
        if val > 0 {
            idx_max = Some(i);
        }
        if val > val_max {
            val_max = val;
        }
    }
    let Some(idx_max) = idx_max else { return };

    let (indent, label_width, num_width, stars) = if idx_max <= 32 {
        (5, 19, 10, STARS_MAX)
    } else {
        (15, 29, 20, STARS_MAX / 2)
    };
    let _ = writeln!(
        out,
        "{:indent$}{unit:<label_width$} : count    distribution",
        ""
    );
    for (i, &val) in vals.iter().enumerate().take(idx_max + 1) {
        // bucket 63 tops out at u64::MAX, which the wrapping ops yield
        let mut low: u64 = 1u64 << i;
        let high: u64 = low.wrapping_shl(1).wrapping_sub(1);
        if low == high {
            low -= 1;
        }
        let _ = write!(out, "{low:>num_width$} -> {high:<num_width$} : {val:<8} |");
        write_stars(out, val as u64, val_max as u64, stars);
        out.push('|');
        out.push('\n');
    }
}

/// Render a linear bucket histogram: bucket `i` is the value `base + i * step`.
pub fn render_linear_hist(out: &mut String, vals: &[u32], base: u32, step: u32, unit: &str) {
    let mut idx_min = None;
    let mut idx_max = None;
    let mut val_max = 0u32;
    for (i, &val) in vals.iter().enumerate() {
        if val > 0 {
            idx_max = Some(i);
            if idx_min.is_none() {
                idx_min = Some(i);
            }
        }
        if val > val_max {
            val_max = val;
        }
    }
    let (Some(idx_min), Some(idx_max)) = (idx_min, idx_max) else {
        return;
    };

    let _ = writeln!(out, "     {unit:<13} : count     distribution");
    for i in idx_min..=idx_max {
        let val = vals[i];
        if val == 0 {
            continue;
        }
        let bucket = base + i as u32 * step;
        let _ = write!(out, "        {bucket:<10} : {val:<8} |");
        write_stars(out, val as u64, val_max as u64, STARS_MAX);
        out.push('|');
        out.push('\n');
    }
}
