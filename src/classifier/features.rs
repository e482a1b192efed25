use crate::bbox::BBox;
use crate::roi::RimRoi;

use super::AttemptTracks;

/// Length of [`WindowFeatures::to_vector`].
pub const FEATURE_COUNT: usize = 6;

const SPEED_WINDOW: usize = 3;
const MAX_DEFLECTION: f32 = 3.0;

/// Windowed ball evidence around the rim.
#[derive(Debug, Clone, PartialEq)]
pub struct WindowFeatures {
    pub samples: usize,
    pub band_samples: usize,
    /// Mean detection confidence of the samples inside the rim band.
    pub band_confidence: f32,
    /// Fraction of band samples whose center stays within the rim extent.
    pub through_ratio: f32,
    /// `1 - speed_after / speed_before` of vertical motion around band entry.
    pub deceleration: f32,
    /// Largest horizontal distance from the rim center after band entry, in rim widths.
    pub deflection: f32,
    /// The ball went back up above the band after entering it.
    pub rebound: bool,
    /// The ball passed rim height without any horizontal overlap with the rim.
    pub beside: bool,
}

impl WindowFeatures {
    pub fn extract(tracks: &AttemptTracks, roi: &RimRoi) -> Self {
        let ball = &tracks.ball;
        let n = ball.len();

        let entry = ball.iter().position(|d| roi.in_band(d.center().y));

        let band: Vec<_> = ball.iter().filter(|d| roi.in_band(d.center().y)).collect();
        let band_samples = band.len();
        let (band_confidence, through_ratio) = if band.is_empty() {
            (0.0, 0.0)
        } else {
            let conf = band.iter().map(|d| d.confidence).sum::<f32>() / band_samples as f32;
            let through = band
                .iter()
                .filter(|d| roi.within_extent(d.center().x))
                .count() as f32
                / band_samples as f32;

            (conf, through)
        };

        let mut deceleration = 0.0;
        let mut deflection = 0.0;
        let mut rebound = false;

        if let Some(e) = entry {
            let speed = |k: usize| {
                let (a, b) = (&ball[k - 1], &ball[k]);
                let df = b.frame_index.saturating_sub(a.frame_index).max(1) as f32;

                (b.center().y - a.center().y).abs() / df
            };

            let before: Vec<f32> = (e.saturating_sub(SPEED_WINDOW - 1).max(1)..=e)
                .map(speed)
                .collect();
            let after: Vec<f32> = (e + 1..n.min(e + 1 + SPEED_WINDOW)).map(speed).collect();

            if let (Some(vb), Some(va)) = (mean(&before), mean(&after)) {
                if vb > f32::EPSILON {
                    deceleration = (1.0 - va / vb).clamp(0.0, 1.0);
                }
            }

            let cx = roi.center().x;
            deflection = ball[e..]
                .iter()
                .map(|d| (d.center().x - cx).abs() / roi.width())
                .fold(0.0f32, f32::max);

            rebound = ball[e..].windows(2).any(|w| {
                let (a, b) = (w[0].center().y, w[1].center().y);
                b < a && roi.above_band(b)
            });
        }

        Self {
            samples: n,
            band_samples,
            band_confidence,
            through_ratio,
            deceleration,
            deflection,
            rebound,
            beside: passes_beside(tracks, roi),
        }
    }

    /// Whether there is enough evidence to decide at all.
    pub fn is_sufficient(&self, min_samples: usize, min_band_confidence: f32) -> bool {
        if self.samples < min_samples {
            return false;
        }
        if self.beside {
            return true;
        }

        self.band_samples > 0 && self.band_confidence >= min_band_confidence
    }

    #[inline]
    pub fn band_fraction(&self) -> f32 {
        if self.samples == 0 {
            0.0
        } else {
            self.band_samples as f32 / self.samples as f32
        }
    }

    /// Feature vector for the learned scorer: through ratio, deceleration,
    /// deflection, rebound, beside, band fraction.
    pub fn to_vector(&self) -> [f32; FEATURE_COUNT] {
        [
            self.through_ratio,
            self.deceleration,
            self.deflection.min(MAX_DEFLECTION),
            if self.rebound { 1.0 } else { 0.0 },
            if self.beside { 1.0 } else { 0.0 },
            self.band_fraction(),
        ]
    }
}

/// Ball boxes at rim height: every in-band sample, plus an interpolated box
/// where the ball jumped over the whole band between two samples.
fn passes_beside(tracks: &AttemptTracks, roi: &RimRoi) -> bool {
    let ball = &tracks.ball;
    let mut crossings = Vec::new();

    for d in ball.iter().filter(|d| roi.in_band(d.center().y)) {
        crossings.push(d.bbox);
    }

    let rim_y = roi.center().y;
    for w in ball.windows(2) {
        let (a, b) = (w[0].center(), w[1].center());
        let jumped = (roi.above_band(a.y) && roi.below_band(b.y))
            || (roi.below_band(a.y) && roi.above_band(b.y));

        if jumped {
            let t = (rim_y - a.y) / (b.y - a.y);
            let x = a.x + (b.x - a.x) * t;
            let (w2, h2) = (w[1].bbox.width() * 0.5, w[1].bbox.height() * 0.5);

            crossings.push(BBox::ltrb(x - w2, rim_y - h2, x + w2, rim_y + h2));
        }
    }

    !crossings.is_empty()
        && crossings
            .iter()
            .all(|b| b.horizontal_overlap(&roi.rim) <= 0.0)
}

fn mean(values: &[f32]) -> Option<f32> {
    if values.is_empty() {
        None
    } else {
        Some(values.iter().sum::<f32>() / values.len() as f32)
    }
}
