use crate::geometry::Vec2;

const INSIDE: u8 = 0;
const LEFT: u8 = 1;
const RIGHT: u8 = 2;
const BOTTOM: u8 = 4;
const TOP: u8 = 8;

fn outcode(p: Vec2, size: f64) -> u8 {
    let mut code = INSIDE;
    if p.x < 0.0 {
        code |= LEFT;
    } else if p.x > size {
        code |= RIGHT;
    }
    if p.y < 0.0 {
        code |= BOTTOM;
    } else if p.y > size {
        code |= TOP;
    }
    code
}

/// Cohen-Sutherland clip of one segment against `[0, size]^2`. Returns the clipped endpoints and
/// whether each was moved onto the boundary.
fn clip_segment(mut a: Vec2, mut b: Vec2, size: f64) -> Option<(Vec2, Vec2, bool, bool)> {
    let mut code_a = outcode(a, size);
    let mut code_b = outcode(b, size);
    let mut a_moved = false;
    let mut b_moved = false;

    loop {
        if code_a | code_b == 0 {
            return Some((a, b, a_moved, b_moved));
        }
        if code_a & code_b != 0 {
            return None;
        }
        let code_out = if code_a != 0 { code_a } else { code_b };
        let p = if code_out & TOP != 0 {
            Vec2::new(a.x + (b.x - a.x) * (size - a.y) / (b.y - a.y), size)
        } else if code_out & BOTTOM != 0 {
            Vec2::new(a.x + (b.x - a.x) * (0.0 - a.y) / (b.y - a.y), 0.0)
        } else if code_out & RIGHT != 0 {
            Vec2::new(size, a.y + (b.y - a.y) * (size - a.x) / (b.x - a.x))
        } else {
            Vec2::new(0.0, a.y + (b.y - a.y) * (0.0 - a.x) / (b.x - a.x))
        };
        if code_out == code_a {
            a = p;
            a_moved = true;
            code_a = outcode(a, size);
        } else {
            b = p;
            b_moved = true;
            code_b = outcode(b, size);
        }
    }
}

/// A maximal in-bounds piece of a clipped polyline. Endpoints synthesized on the boundary lose
/// their original vertex index, and with it their OSM node identity.
#[derive(Clone, Debug)]
pub struct ClippedRun {
    pub points: Vec<Vec2>,
    pub first_original: Option<usize>,
    pub last_original: Option<usize>,
}

/// Clip a polyline to the terrain square `[0, size]^2`. A path that leaves and re-enters the
/// square produces multiple runs.
pub fn clip_polyline(points: &[Vec2], size: f64) -> Vec<ClippedRun> {
    let mut runs: Vec<ClippedRun> = Vec::new();
    let mut current: Option<ClippedRun> = None;

    for i in 0..points.len().saturating_sub(1) {
        match clip_segment(points[i], points[i + 1], size) {
            Some((a, b, a_moved, b_moved)) => {
                let continues = current
                    .as_ref()
                    .map(|run| run.points.last().unwrap().dist_to(a) < 1e-9)
                    .unwrap_or(false);
                if !continues {
                    if let Some(run) = current.take() {
                        if run.points.len() >= 2 {
                            runs.push(run);
                        }
                    }
                    current = Some(ClippedRun {
                        points: vec![a],
                        first_original: if a_moved { None } else { Some(i) },
                        last_original: None,
                    });
                }
                let run = current.as_mut().unwrap();
                run.points.push(b);
                run.last_original = if b_moved { None } else { Some(i + 1) };
            }
            None => {
                if let Some(run) = current.take() {
                    if run.points.len() >= 2 {
                        runs.push(run);
                    }
                }
            }
        }
    }
    if let Some(run) = current.take() {
        if run.points.len() >= 2 {
            runs.push(run);
        }
    }
    runs
}
