use serde::Serialize;

/// Borrowed view over a row-major 16-bit depth image.
///
/// A raw value of 0 marks an invalid pixel. Conversion to millimetres is
/// `raw * depth_scale_m_per_unit * 1000` and happens at the point of use.
#[derive(Clone, Debug)]
pub struct DepthImage<'a> {
    pub w: usize,
    pub h: usize,
    pub stride: usize, // u16 elements between rows
    pub data: &'a [u16],
}

impl<'a> DepthImage<'a> {
    #[inline]
    pub fn get(&self, x: usize, y: usize) -> u16 {
        self.data[y * self.stride + x]
    }
}

/// Borrowed boolean mask aligned with the depth image. `true` marks food.
#[derive(Clone, Debug)]
pub struct FoodMask<'a> {
    pub w: usize,
    pub h: usize,
    pub stride: usize, // bool elements between rows
    pub data: &'a [bool],
}

impl<'a> FoodMask<'a> {
    #[inline]
    pub fn get(&self, x: usize, y: usize) -> bool {
        self.data[y * self.stride + x]
    }

    /// Row-major indices of all masked pixels.
    pub fn pixel_indices(&self) -> Vec<u32> {
        let mut out = Vec::new();
        for y in 0..self.h {
            let row = y * self.stride;
            for x in 0..self.w {
                if self.data[row + x] {
                    out.push((y * self.w + x) as u32);
                }
            }
        }
        out
    }
}

/// Borrowed interleaved 8-bit RGB image. Unused by the geometry core but
/// accepted alongside the depth frame so callers can hand over a capture
/// as one unit; only its shape is validated.
#[derive(Clone, Debug)]
pub struct RgbImage<'a> {
    pub w: usize,
    pub h: usize,
    pub stride: usize, // bytes between rows (>= 3 * w)
    pub data: &'a [u8],
}

/// Terminal output of the estimation pipeline.
#[derive(Clone, Debug, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VolumeResult {
    /// Estimated food volume in millilitres.
    pub volume_ml: f64,
    /// Pixels selected by the food mask.
    pub n_food_pixels: usize,
    /// Food pixels that contributed to the integral (valid depth, bowl hit,
    /// positive height).
    pub n_valid_pixels: usize,
    /// `n_valid_pixels / n_food_pixels`, 0 when the mask is empty.
    pub valid_ratio: f64,
    pub mean_height_mm: f64,
    pub max_height_mm: f64,
    pub std_height_mm: f64,
    /// Fraction of sampled mesh points with a scene correspondence.
    pub fitness: f64,
    /// Root-mean-square correspondence distance of the final alignment.
    pub rmse_mm: f64,
    /// False when ICP exhausted its iterations with a poor fitness.
    pub converged: bool,
}
