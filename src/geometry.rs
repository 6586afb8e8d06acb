use euclid::default::{Box2D, Point2D};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::ops::{Add, Sub};

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Point {
    pub x: f64,
    pub y: f64,
}

impl Point {
    pub fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }
}

impl Add for Point {
    type Output = Point;

    fn add(self, rhs: Point) -> Point {
        Point::new(self.x + rhs.x, self.y + rhs.y)
    }
}

impl Sub for Point {
    type Output = Point;

    fn sub(self, rhs: Point) -> Point {
        Point::new(self.x - rhs.x, self.y - rhs.y)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Rectangle {
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
}

impl fmt::Display for Rectangle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "({}, {}, {}x{})",
            self.x, self.y, self.width, self.height
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Edge {
    Left,
    Top,
    Right,
    Bottom,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EdgeProximity {
    pub edge: Edge,
    pub distance: f64,
}

impl Rectangle {
    pub fn new(x: f64, y: f64, width: f64, height: f64) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    pub fn from_position(position: Point, width: f64, height: f64) -> Self {
        Self::new(position.x, position.y, width, height)
    }

    pub fn left(&self) -> f64 {
        self.x
    }

    pub fn top(&self) -> f64 {
        self.y
    }

    pub fn right(&self) -> f64 {
        self.x + self.width
    }

    pub fn bottom(&self) -> f64 {
        self.y + self.height
    }

    pub fn position(&self) -> Point {
        Point::new(self.x, self.y)
    }

    pub fn center(&self) -> Point {
        Point::new(self.x + self.width / 2.0, self.y + self.height / 2.0)
    }

    pub fn is_valid(&self) -> bool {
        self.x.is_finite()
            && self.y.is_finite()
            && self.width.is_finite()
            && self.height.is_finite()
            && self.width >= 0.0
            && self.height >= 0.0
    }

    pub fn translate(&self, dx: f64, dy: f64) -> Self {
        Self::new(self.x + dx, self.y + dy, self.width, self.height)
    }

    pub fn with_position(&self, position: Point) -> Self {
        Self::new(position.x, position.y, self.width, self.height)
    }

    pub fn same_size(&self, other: &Rectangle) -> bool {
        self.width == other.width && self.height == other.height
    }

    pub fn to_box2d(&self) -> Box2D<f64> {
        Box2D::new(
            Point2D::new(self.left(), self.top()),
            Point2D::new(self.right(), self.bottom()),
        )
    }

    pub fn intersects_with(&self, other: &Rectangle) -> bool {
        if !self.is_valid() || !other.is_valid() {
            return false;
        }
        let a = self.to_box2d();
        let b = other.to_box2d();
        a.min.x <= b.max.x && b.min.x <= a.max.x && a.min.y <= b.max.y && b.min.y <= a.max.y
    }

    pub fn contains(&self, other: &Rectangle) -> bool {
        if !self.is_valid() || !other.is_valid() {
            return false;
        }
        self.to_box2d().contains_box(&other.to_box2d())
    }

    pub fn contains_point(&self, point: Point) -> bool {
        self.is_valid()
            && point.x >= self.left()
            && point.x <= self.right()
            && point.y >= self.top()
            && point.y <= self.bottom()
    }

    /// Minimal distance between any edge of `self` and a parallel edge of
    /// `other`, counting only pairs whose perpendicular extents overlap by a
    /// positive length. Corner-to-corner contact therefore yields `None`.
    pub fn edge_proximity(&self, other: &Rectangle) -> Option<EdgeProximity> {
        if !self.is_valid() || !other.is_valid() {
            return None;
        }

        let mut best: Option<EdgeProximity> = None;
        let mut consider = |edge: Edge, distance: f64| {
            if best.map_or(true, |b| distance < b.distance) {
                best = Some(EdgeProximity { edge, distance });
            }
        };

        if span_overlap(self.top(), self.bottom(), other.top(), other.bottom()) > 0.0 {
            for (edge, ours) in [(Edge::Left, self.left()), (Edge::Right, self.right())] {
                for theirs in [other.left(), other.right()] {
                    consider(edge, (ours - theirs).abs());
                }
            }
        }

        if span_overlap(self.left(), self.right(), other.left(), other.right()) > 0.0 {
            for (edge, ours) in [(Edge::Top, self.top()), (Edge::Bottom, self.bottom())] {
                for theirs in [other.top(), other.bottom()] {
                    consider(edge, (ours - theirs).abs());
                }
            }
        }

        best
    }

    pub fn is_adjacent(&self, other: &Rectangle, threshold: f64) -> bool {
        self.edge_proximity(other)
            .map(|p| p.distance <= threshold)
            .unwrap_or(false)
    }
}

fn span_overlap(a_start: f64, a_end: f64, b_start: f64, b_end: f64) -> f64 {
    a_end.min(b_end) - a_start.max(b_start)
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Display {
    pub id: String,
    pub scale_factor: f64,
    pub bounds: Rectangle,
    pub work_area: Rectangle,
}

impl Display {
    pub fn new(id: impl Into<String>, scale_factor: f64, bounds: Rectangle, work_area: Rectangle) -> Self {
        Self {
            id: id.into(),
            scale_factor,
            bounds,
            work_area,
        }
    }

    pub fn is_consistent(&self) -> bool {
        self.bounds.contains(&self.work_area)
    }

    pub fn contains_point(&self, point: Point) -> bool {
        self.bounds.contains_point(point)
    }
}
