//! メディアンカット（MMCQ）によるパレット量子化
//!
//! 各チャネルを上位5ビットに落としたヒストグラム上で色空間の箱（VBox）を分割していきます。
//! 最初は画素数で、目標色数の75%に達した後は「画素数 × 体積」で分割対象を選びます。

const SIGBITS: u32 = 5;
const RSHIFT: u32 = 8 - SIGBITS;
const HISTO_SIZE: usize = 1 << (3 * SIGBITS);
const MAX_ITERATIONS: usize = 1000;
const FRACT_BY_POPULATION: f64 = 0.75;

/// 透明とみなすアルファ値の上限（これ未満は除外）
const MIN_ALPHA: u8 = 125;
/// ほぼ白とみなす各チャネルの下限（全チャネルがこれを超えると除外）
const NEAR_WHITE: u8 = 250;

fn color_index(r: usize, g: usize, b: usize) -> usize {
    (r << (2 * SIGBITS)) + (g << SIGBITS) + b
}

/// 量子化対象の画素をサンプリングする
///
/// `step` 画素ごとに1画素を取り出し、半透明・ほぼ白の画素を除外します。
/// 除外の結果サンプルが空になった場合（白一色の服など）は、除外前のサンプルを返します。
pub fn sample_pixels(rgba: &[[u8; 4]], step: usize) -> Vec<[u8; 3]> {
    let step = step.max(1);
    let sampled: Vec<[u8; 4]> = rgba.iter().step_by(step).copied().collect();

    let filtered: Vec<[u8; 3]> = sampled
        .iter()
        .filter(|[r, g, b, a]| {
            *a >= MIN_ALPHA && !(*r > NEAR_WHITE && *g > NEAR_WHITE && *b > NEAR_WHITE)
        })
        .map(|[r, g, b, _]| [*r, *g, *b])
        .collect();

    if filtered.is_empty() {
        sampled.iter().map(|[r, g, b, _]| [*r, *g, *b]).collect()
    } else {
        filtered
    }
}

struct Histogram {
    bins: Vec<u32>,
}

impl Histogram {
    fn from_pixels(pixels: &[[u8; 3]]) -> Self {
        let mut bins = vec![0u32; HISTO_SIZE];
        for [r, g, b] in pixels {
            let index = color_index(
                (*r >> RSHIFT) as usize,
                (*g >> RSHIFT) as usize,
                (*b >> RSHIFT) as usize,
            );
            bins[index] += 1;
        }
        Self { bins }
    }

    fn get(&self, r: usize, g: usize, b: usize) -> u64 {
        self.bins[color_index(r, g, b)] as u64
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Channel {
    Red,
    Green,
    Blue,
}

/// 量子化空間内の直方体
#[derive(Debug, Clone, Copy)]
struct VBox {
    lo: [usize; 3],
    hi: [usize; 3],
    count: u64,
}

impl VBox {
    fn new(lo: [usize; 3], hi: [usize; 3], histo: &Histogram) -> Self {
        let mut vbox = Self { lo, hi, count: 0 };
        vbox.count = vbox.population(histo);
        vbox
    }

    fn from_pixels(pixels: &[[u8; 3]], histo: &Histogram) -> Self {
        let mut lo = [usize::MAX; 3];
        let mut hi = [0usize; 3];
        for pixel in pixels {
            for c in 0..3 {
                let v = (pixel[c] >> RSHIFT) as usize;
                lo[c] = lo[c].min(v);
                hi[c] = hi[c].max(v);
            }
        }
        Self::new(lo, hi, histo)
    }

    fn cells(&self) -> impl Iterator<Item = (usize, usize, usize)> + '_ {
        (self.lo[0]..=self.hi[0]).flat_map(move |r| {
            (self.lo[1]..=self.hi[1])
                .flat_map(move |g| (self.lo[2]..=self.hi[2]).map(move |b| (r, g, b)))
        })
    }

    fn population(&self, histo: &Histogram) -> u64 {
        self.cells().map(|(r, g, b)| histo.get(r, g, b)).sum()
    }

    fn width(&self, c: usize) -> usize {
        self.hi[c] - self.lo[c] + 1
    }

    fn volume(&self) -> u64 {
        (0..3).map(|c| self.width(c) as u64).product()
    }

    /// ヒストグラム重み付きの平均色
    fn average(&self, histo: &Histogram) -> [u8; 3] {
        let mult = (1usize << RSHIFT) as f64;
        let mut total = 0u64;
        let mut sums = [0f64; 3];

        for (r, g, b) in self.cells() {
            let h = histo.get(r, g, b);
            if h == 0 {
                continue;
            }
            total += h;
            sums[0] += h as f64 * (r as f64 + 0.5) * mult;
            sums[1] += h as f64 * (g as f64 + 0.5) * mult;
            sums[2] += h as f64 * (b as f64 + 0.5) * mult;
        }

        let mut avg = [0u8; 3];
        for c in 0..3 {
            let value = if total > 0 {
                sums[c] / total as f64
            } else {
                mult * (self.lo[c] + self.hi[c] + 1) as f64 / 2.0
            };
            avg[c] = value.clamp(0.0, 255.0) as u8;
        }
        avg
    }

    fn longest_channel(&self) -> Channel {
        let (rw, gw, bw) = (self.width(0), self.width(1), self.width(2));
        let max = rw.max(gw).max(bw);
        if max == rw {
            Channel::Red
        } else if max == gw {
            Channel::Green
        } else {
            Channel::Blue
        }
    }

    /// 最長の軸に沿って画素数の中央で2分割する
    ///
    /// 1セルしかない箱、または空の片側しか作れない箱は分割できず `None` を返します。
    fn split(&self, histo: &Histogram) -> Option<(VBox, VBox)> {
        if self.count < 2 {
            return None;
        }

        let axis = match self.longest_channel() {
            Channel::Red => 0,
            Channel::Green => 1,
            Channel::Blue => 2,
        };
        let (lo, hi) = (self.lo[axis], self.hi[axis]);
        if lo == hi {
            return None;
        }

        // 軸上の各スライスまでの累積画素数
        let mut partial = Vec::with_capacity(hi - lo + 1);
        let mut total = 0u64;
        for i in lo..=hi {
            let mut slice = *self;
            slice.lo[axis] = i;
            slice.hi[axis] = i;
            total += slice.population(histo);
            partial.push(total);
        }

        let half = total / 2;
        let median = (lo..=hi).find(|&i| partial[i - lo] > half)?;

        let left = median - lo;
        let right = hi - median;
        let mut cut = if left <= right {
            (hi - 1).min(median + right / 2)
        } else {
            let raw = median as f64 - 1.0 - left as f64 / 2.0;
            lo.max(raw.max(0.0) as usize)
        };

        // 空の左側を避ける
        while cut < hi && partial[cut - lo] == 0 {
            cut += 1;
        }
        // 空の右側を避ける
        while cut > lo && partial[cut - lo] == total {
            cut -= 1;
        }
        if cut >= hi || partial[cut - lo] == 0 || partial[cut - lo] == total {
            return None;
        }

        let mut first_hi = self.hi;
        first_hi[axis] = cut;
        let mut second_lo = self.lo;
        second_lo[axis] = cut + 1;

        Some((
            VBox::new(self.lo, first_hi, histo),
            VBox::new(second_lo, self.hi, histo),
        ))
    }
}

/// 優先度の高い箱から順に分割し、箱の数が `target` に達するまで繰り返す
fn split_until<F>(boxes: &mut Vec<VBox>, target: usize, histo: &Histogram, priority: F)
where
    F: Fn(&VBox) -> u64,
{
    let mut frozen: Vec<VBox> = Vec::new();

    for _ in 0..MAX_ITERATIONS {
        if boxes.len() + frozen.len() >= target || boxes.is_empty() {
            break;
        }

        // 同じ優先度なら後から追加された箱を選ぶ
        let Some(pos) = boxes
            .iter()
            .enumerate()
            .max_by(|(ia, a), (ib, b)| priority(a).cmp(&priority(b)).then(ia.cmp(ib)))
            .map(|(i, _)| i)
        else {
            break;
        };
        let candidate = boxes.remove(pos);

        match candidate.split(histo) {
            Some((first, second)) => {
                boxes.push(first);
                boxes.push(second);
            }
            None => frozen.push(candidate),
        }
    }

    boxes.extend(frozen);
}

/// 画素列を最大 `max_colors` 色に量子化する
///
/// 戻り値は「画素数 × 体積」の降順。空の入力には空のパレットを返します。
pub fn quantize(pixels: &[[u8; 3]], max_colors: usize) -> Vec<[u8; 3]> {
    if pixels.is_empty() || max_colors == 0 {
        return Vec::new();
    }

    let histo = Histogram::from_pixels(pixels);
    let mut boxes = vec![VBox::from_pixels(pixels, &histo)];

    let first_target = ((FRACT_BY_POPULATION * max_colors as f64).ceil() as usize).max(1);
    split_until(&mut boxes, first_target, &histo, |b| b.count);
    split_until(&mut boxes, max_colors, &histo, |b| b.count * b.volume());

    boxes.retain(|b| b.count > 0);
    // 安定ソートで同順位は分割順を保つ
    boxes.sort_by(|a, b| (b.count * b.volume()).cmp(&(a.count * a.volume())));
    boxes.truncate(max_colors);

    boxes.iter().map(|b| b.average(&histo)).collect()
}
