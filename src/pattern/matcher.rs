//! Grayscale template matching.
//!
//! Scores placements of the template with the zero-mean normalized
//! cross-correlation coefficient (1.0 = identical up to brightness/contrast,
//! 0.0 = unrelated). Window sums come from integral images so only the
//! cross term costs `template_w * template_h` per placement.
//!
//! Small searches score every placement. Larger ones (a sizeable template
//! over a whole screen) score a 2x2-averaged pyramid level first, then follow
//! the best coarse peaks down to full resolution, rescoring a few placements
//! around each at every level.

use image::{GrayImage, Luma};

/// Location of the template inside the searched image.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Match {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
    pub score: f64,
}

impl Match {
    /// Center of the matched rectangle, relative to the searched image.
    pub fn center(&self) -> (u32, u32) {
        (self.x + self.width / 2, self.y + self.height / 2)
    }
}

const EPSILON: f64 = 1e-9;
/// Multiply-adds an exhaustive pass may cost before the pyramid is used.
const EXHAUSTIVE_BUDGET: u64 = 4_000_000;
/// Shorter template side a pyramid level must keep.
const COARSE_MIN_SIDE: u32 = 8;
const MAX_LEVELS: usize = 3;
/// Coarse peaks followed down to full resolution.
const COARSE_CANDIDATES: usize = 32;
/// Half-width of the window rescored around a peak at each finer level.
const REFINE_RADIUS: u32 = 2;

/// Best-scoring placement whose score reaches `threshold`, if any.
pub fn locate(template: &GrayImage, haystack: &GrayImage, threshold: f64) -> Option<Match> {
    locate_until(template, haystack, threshold, &|| true)
}

/// [`locate`], giving up (`None`) as soon as `keep_going` returns false.
pub fn locate_until(
    template: &GrayImage,
    haystack: &GrayImage,
    threshold: f64,
    keep_going: &dyn Fn() -> bool,
) -> Option<Match> {
    best_match_until(template, haystack, keep_going).filter(|m| m.score >= threshold)
}

/// Best-scoring placement of `template` in `haystack`. Exhaustive searches
/// keep the first placement in row-major order on ties. `None` when the
/// template is empty or does not fit.
pub fn best_match(template: &GrayImage, haystack: &GrayImage) -> Option<Match> {
    best_match_until(template, haystack, &|| true)
}

/// [`best_match`], polling `keep_going` once per scanned row and per
/// followed peak; returns `None` when it says stop.
pub fn best_match_until(
    template: &GrayImage,
    haystack: &GrayImage,
    keep_going: &dyn Fn() -> bool,
) -> Option<Match> {
    let (tw, th) = template.dimensions();
    let (hw, hh) = haystack.dimensions();
    if tw == 0 || th == 0 || tw > hw || th > hh {
        return None;
    }
    match pyramid_levels(tw, th, hw, hh) {
        0 => exhaustive(template, haystack, keep_going),
        levels => coarse_to_fine(template, haystack, levels, keep_going),
    }
}

fn exhaustive(template: &GrayImage, haystack: &GrayImage, keep_going: &dyn Fn() -> bool) -> Option<Match> {
    let prepared = Prepared::new(template);
    let mut best: Option<Match> = None;
    let finished = prepared.scan(haystack, keep_going, |x, y, score| {
        if best.is_none_or(|b| score > b.score) {
            best = Some(prepared.at(x, y, score));
        }
    });
    if finished { best } else { None }
}

fn coarse_to_fine(
    template: &GrayImage,
    haystack: &GrayImage,
    levels: usize,
    keep_going: &dyn Fn() -> bool,
) -> Option<Match> {
    let template_levels = pyramid(template, levels);
    let haystack_levels = pyramid(haystack, levels);
    let prepared: Vec<Prepared> = std::iter::once(template)
        .chain(&template_levels)
        .map(Prepared::new)
        .collect();
    let images: Vec<&GrayImage> = std::iter::once(haystack).chain(&haystack_levels).collect();

    let coarse = &prepared[levels];
    let coarse_image = images[levels];
    let grid_w = coarse_image.width() - coarse.width + 1;
    let grid_h = coarse_image.height() - coarse.height + 1;
    let mut grid = vec![f64::NEG_INFINITY; grid_w as usize * grid_h as usize];
    let finished = coarse.scan(coarse_image, keep_going, |x, y, score| {
        grid[y as usize * grid_w as usize + x as usize] = score;
    });
    if !finished {
        return None;
    }

    let mut best: Option<Match> = None;
    for peak in peaks(&grid, grid_w, grid_h, COARSE_CANDIDATES) {
        if !keep_going() {
            return None;
        }
        let (x, y, score) = (0..levels)
            .rev()
            .fold((peak.0, peak.1, f64::NEG_INFINITY), |(x, y, _), level| {
                prepared[level].refine(images[level], x * 2, y * 2)
            });
        if best.is_none_or(|b| score > b.score) {
            best = Some(prepared[0].at(x, y, score));
        }
    }
    best
}

/// Number of halvings that bring an exhaustive pass under budget while the
/// template stays at least `COARSE_MIN_SIDE` on its shorter side.
fn pyramid_levels(mut tw: u32, mut th: u32, mut hw: u32, mut hh: u32) -> usize {
    let cost = |tw: u32, th: u32, hw: u32, hh: u32| {
        u64::from(hw - tw + 1) * u64::from(hh - th + 1) * u64::from(tw) * u64::from(th)
    };
    let mut levels = 0;
    while levels < MAX_LEVELS && cost(tw, th, hw, hh) > EXHAUSTIVE_BUDGET && tw.min(th) / 2 >= COARSE_MIN_SIDE {
        (tw, th, hw, hh) = (tw / 2, th / 2, hw / 2, hh / 2);
        levels += 1;
    }
    levels
}

/// `levels` successive 2x2 averages of `img`, finest first.
fn pyramid(img: &GrayImage, levels: usize) -> Vec<GrayImage> {
    let mut out: Vec<GrayImage> = Vec::with_capacity(levels);
    for _ in 0..levels {
        let next = halve(out.last().unwrap_or(img));
        out.push(next);
    }
    out
}

fn halve(img: &GrayImage) -> GrayImage {
    GrayImage::from_fn(img.width() / 2, img.height() / 2, |x, y| {
        let (x0, y0) = (x * 2, y * 2);
        let sum: u32 = [(x0, y0), (x0 + 1, y0), (x0, y0 + 1), (x0 + 1, y0 + 1)]
            .iter()
            .map(|&(px, py)| u32::from(img.get_pixel(px, py)[0]))
            .sum();
        Luma([((sum + 2) / 4) as u8])
    })
}

/// Local maxima of a score grid (ties with a neighbour count), best first.
fn peaks(grid: &[f64], width: u32, height: u32, limit: usize) -> Vec<(u32, u32)> {
    let (w, h) = (width as usize, height as usize);
    let mut found: Vec<(f64, u32, u32)> = Vec::new();
    for y in 0..h {
        for x in 0..w {
            let score = grid[y * w + x];
            if !score.is_finite() {
                continue;
            }
            let is_peak = (y.saturating_sub(1)..=(y + 1).min(h - 1))
                .flat_map(|ny| (x.saturating_sub(1)..=(x + 1).min(w - 1)).map(move |nx| (nx, ny)))
                .all(|(nx, ny)| grid[ny * w + nx] <= score);
            if is_peak {
                found.push((score, x as u32, y as u32));
            }
        }
    }
    found.sort_by(|a, b| b.0.total_cmp(&a.0));
    found.truncate(limit);
    found.into_iter().map(|(_, x, y)| (x, y)).collect()
}

/// A template with its mean removed, ready to be scored against windows.
struct Prepared {
    width: u32,
    height: u32,
    n: f64,
    mean: f64,
    centered: Vec<f64>,
    energy: f64,
}

impl Prepared {
    fn new(template: &GrayImage) -> Self {
        let (width, height) = template.dimensions();
        let n = f64::from(width) * f64::from(height);
        let raw = template.as_raw();
        let mean = raw.iter().map(|&p| f64::from(p)).sum::<f64>() / n;
        let centered: Vec<f64> = raw.iter().map(|&p| f64::from(p) - mean).collect();
        let energy = centered.iter().map(|v| v * v).sum();
        Self {
            width,
            height,
            n,
            mean,
            centered,
            energy,
        }
    }

    fn at(&self, x: u32, y: u32, score: f64) -> Match {
        Match {
            x,
            y,
            width: self.width,
            height: self.height,
            score,
        }
    }

    /// Score every placement in row-major order. `false` when `keep_going`
    /// stopped the scan early.
    fn scan(&self, haystack: &GrayImage, keep_going: &dyn Fn() -> bool, mut visit: impl FnMut(u32, u32, f64)) -> bool {
        let integral = Integral::new(haystack);
        for y in 0..=(haystack.height() - self.height) {
            if !keep_going() {
                return false;
            }
            for x in 0..=(haystack.width() - self.width) {
                let (sum, sq) = integral.window(x, y, self.width, self.height);
                visit(x, y, self.score_window(haystack, x, y, sum, sq));
            }
        }
        true
    }

    /// Best placement within `REFINE_RADIUS` of `(cx, cy)`.
    fn refine(&self, haystack: &GrayImage, cx: u32, cy: u32) -> (u32, u32, f64) {
        let max_x = haystack.width() - self.width;
        let max_y = haystack.height() - self.height;
        let (cx, cy) = (cx.min(max_x), cy.min(max_y));
        let mut best = (cx, cy, f64::NEG_INFINITY);
        for y in cy.saturating_sub(REFINE_RADIUS)..=(cy + REFINE_RADIUS).min(max_y) {
            for x in cx.saturating_sub(REFINE_RADIUS)..=(cx + REFINE_RADIUS).min(max_x) {
                let score = self.score(haystack, x, y);
                if score > best.2 {
                    best = (x, y, score);
                }
            }
        }
        best
    }

    /// Score one placement, summing the window directly.
    fn score(&self, haystack: &GrayImage, x: u32, y: u32) -> f64 {
        let (mut sum, mut sq) = (0.0, 0.0);
        for row in self.window_rows(haystack, x, y) {
            for &p in row {
                let p = f64::from(p);
                sum += p;
                sq += p * p;
            }
        }
        self.score_window(haystack, x, y, sum, sq)
    }

    fn score_window(&self, haystack: &GrayImage, x: u32, y: u32, sum: f64, sq: f64) -> f64 {
        let w_energy = (sq - sum * sum / self.n).max(0.0);
        if self.energy < EPSILON || w_energy < EPSILON {
            // Flat template or flat window: only an equally flat, equally
            // bright window counts as a match.
            let flat_match =
                self.energy < EPSILON && w_energy < EPSILON && (sum / self.n - self.mean).abs() < 0.5;
            return if flat_match { 1.0 } else { 0.0 };
        }
        let width = self.width as usize;
        let cross: f64 = self
            .window_rows(haystack, x, y)
            .zip(self.centered.chunks_exact(width))
            .map(|(h_row, t_row)| t_row.iter().zip(h_row).map(|(t, &p)| t * f64::from(p)).sum::<f64>())
            .sum();
        (cross / (self.energy * w_energy).sqrt()).clamp(-1.0, 1.0)
    }

    fn window_rows<'h>(&self, haystack: &'h GrayImage, x: u32, y: u32) -> impl Iterator<Item = &'h [u8]> {
        let stride = haystack.width() as usize;
        let (x, y, width) = (x as usize, y as usize, self.width as usize);
        let raw = haystack.as_raw();
        (y..y + self.height as usize).map(move |row| &raw[row * stride + x..row * stride + x + width])
    }
}

/// Summed-area tables of pixel values and squared pixel values.
struct Integral {
    stride: usize,
    sum: Vec<f64>,
    sq: Vec<f64>,
}

impl Integral {
    fn new(img: &GrayImage) -> Self {
        let (w, h) = (img.width() as usize, img.height() as usize);
        let stride = w + 1;
        let mut sum = vec![0.0; stride * (h + 1)];
        let mut sq = vec![0.0; stride * (h + 1)];
        let raw = img.as_raw();
        for y in 0..h {
            let mut row_sum = 0.0;
            let mut row_sq = 0.0;
            for x in 0..w {
                let p = f64::from(raw[y * w + x]);
                row_sum += p;
                row_sq += p * p;
                let at = (y + 1) * stride + x + 1;
                sum[at] = sum[at - stride] + row_sum;
                sq[at] = sq[at - stride] + row_sq;
            }
        }
        Self { stride, sum, sq }
    }

    fn window(&self, x: u32, y: u32, w: u32, h: u32) -> (f64, f64) {
        let (x0, y0) = (x as usize, y as usize);
        let (x1, y1) = (x0 + w as usize, y0 + h as usize);
        let at = |table: &[f64], x: usize, y: usize| table[y * self.stride + x];
        let area = |table: &[f64]| at(table, x1, y1) - at(table, x0, y1) - at(table, x1, y0) + at(table, x0, y0);
        (area(&self.sum), area(&self.sq))
    }
}
