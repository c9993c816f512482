use crate::geometry::{Ring, TilePoint};

/// Clips lines to the box `[x1, x2) x [y1, y2)`. A line leaving and
/// re-entering the box is split in two; crossing points are rounded.
pub fn clip_line(lines: &[Ring], x1: i32, y1: i32, x2: i32, y2: i32) -> Vec<Ring> {
    let mut clipped: Vec<Ring> = Vec::new();

    for line in lines {
        let mut current: Option<usize> = None;

        for w in line.windows(2) {
            let (mut p0, mut p1) = (w[0], w[1]);

            if p0.x < x1 && p1.x < x1 {
                continue;
            } else if p0.x < x1 {
                p0 = at_x(p0, p1, x1);
            } else if p1.x < x1 {
                p1 = at_x(p0, p1, x1);
            }

            if p0.y < y1 && p1.y < y1 {
                continue;
            } else if p0.y < y1 {
                p0 = at_y(p0, p1, y1);
            } else if p1.y < y1 {
                p1 = at_y(p0, p1, y1);
            }

            if p0.x >= x2 && p1.x >= x2 {
                continue;
            } else if p0.x >= x2 {
                p0 = at_x(p0, p1, x2);
            } else if p1.x >= x2 {
                p1 = at_x(p0, p1, x2);
            }

            if p0.y >= y2 && p1.y >= y2 {
                continue;
            } else if p0.y >= y2 {
                p0 = at_y(p0, p1, y2);
            } else if p1.y >= y2 {
                p1 = at_y(p0, p1, y2);
            }

            let continues = current
                .and_then(|i| clipped[i].last())
                .is_some_and(|last| *last == p0);
            if !continues {
                clipped.push(vec![p0]);
                current = Some(clipped.len() - 1);
            }
            if let Some(i) = current {
                clipped[i].push(p1);
            }
        }
    }

    clipped
}

fn at_x(p0: TilePoint, p1: TilePoint, x: i32) -> TilePoint {
    let t = (x - p0.x) as f64 / (p1.x - p0.x) as f64;
    let y = p0.y as f64 + (p1.y - p0.y) as f64 * t;
    TilePoint::new(x, y.round() as i32)
}

fn at_y(p0: TilePoint, p1: TilePoint, y: i32) -> TilePoint {
    let t = (y - p0.y) as f64 / (p1.y - p0.y) as f64;
    let x = p0.x as f64 + (p1.x - p0.x) as f64 * t;
    TilePoint::new(x.round() as i32, y)
}
