//! Integer rectangles in canvas space and the 2x3 affine transform applied
//! to layer pixels.

/// An axis aligned rectangle in canvas coordinates.
///
/// Half open: `left`/`top` are inside the rectangle, `right`/`bottom` are
/// one past the last pixel. A rectangle with `right <= left` or
/// `bottom <= top` is empty.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Default)]
pub struct Rect {
    /// Leftmost pixel column (inclusive)
    pub left: i32,
    /// Topmost pixel row (inclusive)
    pub top: i32,
    /// One past the rightmost pixel column
    pub right: i32,
    /// One past the bottommost pixel row
    pub bottom: i32,
}

impl Rect {
    /// Create a rectangle from its edges.
    pub fn new(left: i32, top: i32, right: i32, bottom: i32) -> Rect {
        Rect {
            left,
            top,
            right,
            bottom,
        }
    }

    /// A rectangle anchored at `(left, top)` with the given size.
    pub fn from_size(left: i32, top: i32, width: i32, height: i32) -> Rect {
        Rect::new(left, top, left + width, top + height)
    }

    /// The empty rectangle at the origin.
    pub fn zero() -> Rect {
        Rect::default()
    }

    /// Width in pixels, zero when empty.
    pub fn width(&self) -> i32 {
        (self.right - self.left).max(0)
    }

    /// Height in pixels, zero when empty.
    pub fn height(&self) -> i32 {
        (self.bottom - self.top).max(0)
    }

    /// Whether this rectangle contains no pixels.
    pub fn is_empty(&self) -> bool {
        self.right <= self.left || self.bottom <= self.top
    }

    /// Whether the pixel at `(x, y)` lies inside this rectangle.
    pub fn contains(&self, x: i32, y: i32) -> bool {
        x >= self.left && x < self.right && y >= self.top && y < self.bottom
    }

    /// Whether `other` lies entirely inside this rectangle.
    ///
    /// The empty rectangle is contained by everything.
    pub fn contains_rect(&self, other: &Rect) -> bool {
        other.is_empty()
            || (other.left >= self.left
                && other.top >= self.top
                && other.right <= self.right
                && other.bottom <= self.bottom)
    }

    /// The overlapping region of two rectangles, possibly empty.
    pub fn intersect(&self, other: &Rect) -> Rect {
        Rect {
            left: self.left.max(other.left),
            top: self.top.max(other.top),
            right: self.right.min(other.right),
            bottom: self.bottom.min(other.bottom),
        }
    }

    /// The smallest rectangle covering both rectangles.
    ///
    /// Empty inputs are ignored so that a running union can start from
    /// `Rect::zero()`.
    pub fn union(&self, other: &Rect) -> Rect {
        if self.is_empty() {
            return *other;
        }
        if other.is_empty() {
            return *self;
        }
        Rect {
            left: self.left.min(other.left),
            top: self.top.min(other.top),
            right: self.right.max(other.right),
            bottom: self.bottom.max(other.bottom),
        }
    }

    /// This rectangle shifted by `(dx, dy)`.
    pub fn translate(&self, dx: i32, dy: i32) -> Rect {
        Rect {
            left: self.left + dx,
            top: self.top + dy,
            right: self.right + dx,
            bottom: self.bottom + dy,
        }
    }
}

/// A 2x3 affine transform over canvas coordinates.
///
/// Maps `(x, y)` to `(sx * x + kx * y + tx, ky * x + sy * y + ty)`.
#[derive(Debug, Copy, Clone, PartialEq)]
pub struct Transform {
    /// Horizontal scale
    pub sx: f64,
    /// Horizontal skew
    pub kx: f64,
    /// Vertical skew
    pub ky: f64,
    /// Vertical scale
    pub sy: f64,
    /// Horizontal translation
    pub tx: f64,
    /// Vertical translation
    pub ty: f64,
}

impl Default for Transform {
    fn default() -> Transform {
        Transform::identity()
    }
}

impl Transform {
    /// The identity transform.
    pub fn identity() -> Transform {
        Transform {
            sx: 1.0,
            kx: 0.0,
            ky: 0.0,
            sy: 1.0,
            tx: 0.0,
            ty: 0.0,
        }
    }

    /// A pure translation.
    pub fn from_translate(tx: f64, ty: f64) -> Transform {
        Transform {
            tx,
            ty,
            ..Transform::identity()
        }
    }

    /// A scale about the origin.
    pub fn from_scale(sx: f64, sy: f64) -> Transform {
        Transform {
            sx,
            sy,
            ..Transform::identity()
        }
    }

    /// A counterclockwise rotation about the origin, in degrees.
    pub fn from_rotate(degrees: f64) -> Transform {
        let radians = degrees.to_radians();
        let (sin, cos) = radians.sin_cos();
        Transform {
            sx: cos,
            kx: -sin,
            ky: sin,
            sy: cos,
            tx: 0.0,
            ty: 0.0,
        }
    }

    /// Replace zeroed diagonal entries with 1.
    ///
    /// Callers that leave the matrix zero initialized get the identity
    /// instead of a degenerate transform. Only the diagonal is filled, so a
    /// rotation-only matrix with zero diagonals must be passed complete.
    pub fn or_identity(mut self) -> Transform {
        if self.sx == 0.0 {
            self.sx = 1.0;
        }
        if self.sy == 0.0 {
            self.sy = 1.0;
        }
        self
    }

    /// Whether this is exactly the identity transform.
    pub fn is_identity(&self) -> bool {
        *self == Transform::identity()
    }

    /// Whether this transform only translates by whole pixels.
    pub fn is_integer_translate(&self) -> bool {
        self.sx == 1.0
            && self.kx == 0.0
            && self.ky == 0.0
            && self.sy == 1.0
            && self.tx.fract() == 0.0
            && self.ty.fract() == 0.0
    }

    /// Map a point through this transform.
    pub fn map(&self, x: f64, y: f64) -> (f64, f64) {
        (
            self.sx * x + self.kx * y + self.tx,
            self.ky * x + self.sy * y + self.ty,
        )
    }

    /// The inverse transform, or `None` when the matrix is singular.
    pub fn invert(&self) -> Option<Transform> {
        let det = self.sx * self.sy - self.kx * self.ky;
        if det == 0.0 || !det.is_finite() {
            return None;
        }
        let inv_det = 1.0 / det;
        Some(Transform {
            sx: self.sy * inv_det,
            kx: -self.kx * inv_det,
            ky: -self.ky * inv_det,
            sy: self.sx * inv_det,
            tx: (self.kx * self.ty - self.sy * self.tx) * inv_det,
            ty: (self.ky * self.tx - self.sx * self.ty) * inv_det,
        })
    }
}

/// The canvas space rectangle covering `rect` mapped through `transform`.
///
/// The four corners are mapped, the minimum corner is floored and the
/// maximum corner is expanded by one pixel before the ceil. The extra
/// expansion over-covers by design so that tile coverage never misses a
/// boundary sample; trimming it would change which tiles exist.
pub fn transform_rect(rect: &Rect, transform: &Transform) -> Rect {
    if rect.is_empty() {
        return Rect::zero();
    }

    let corners = [
        transform.map(rect.left as f64, rect.top as f64),
        transform.map(rect.right as f64, rect.top as f64),
        transform.map(rect.left as f64, rect.bottom as f64),
        transform.map(rect.right as f64, rect.bottom as f64),
    ];

    let mut min_x = f64::INFINITY;
    let mut min_y = f64::INFINITY;
    let mut max_x = f64::NEG_INFINITY;
    let mut max_y = f64::NEG_INFINITY;
    for &(x, y) in corners.iter() {
        min_x = min_x.min(x);
        min_y = min_y.min(y);
        max_x = max_x.max(x);
        max_y = max_y.max(y);
    }

    Rect {
        left: min_x.floor() as i32,
        top: min_y.floor() as i32,
        right: (max_x + 1.0).ceil() as i32,
        bottom: (max_y + 1.0).ceil() as i32,
    }
}
