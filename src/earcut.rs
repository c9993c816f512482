//! Ear clipping polygon triangulation.
//!
//! Rings are kept as circular doubly linked lists inside a node arena. Holes
//! are bridged into the outer ring before clipping. Shapes with more than 80
//! vertices hash nodes along a z-order curve so the ear test only scans nearby
//! nodes. When no ear can be found the ring is filtered, then cured of local
//! self intersections, then split along a valid diagonal.

use crate::geometry::Ring;

const NIL: usize = usize::MAX;
const HASH_THRESHOLD: usize = 80;

#[derive(Debug, Clone)]
struct Node {
    i: usize,
    x: f64,
    y: f64,
    prev: usize,
    next: usize,
    z: u32,
    prev_z: usize,
    next_z: usize,
    steiner: bool,
}

struct Earcut {
    nodes: Vec<Node>,
    triangles: Vec<usize>,
    min_x: f64,
    min_y: f64,
    inv_size: f64,
}

/// Flattens a polygon (outer ring then holes) into coordinates and the vertex
/// index each hole starts at.
pub fn flatten(polygon: &[Ring]) -> (Vec<f64>, Vec<usize>) {
    let mut data = Vec::with_capacity(polygon.iter().map(|r| r.len() * 2).sum());
    let mut holes = Vec::new();

    for (r, ring) in polygon.iter().enumerate() {
        if r > 0 {
            holes.push(data.len() / 2);
        }
        for p in ring {
            data.push(p.x as f64);
            data.push(p.y as f64);
        }
    }

    (data, holes)
}

/// Triangulates `data` (flat x, y pairs) with holes starting at the given
/// vertex indices. Returns vertex indices, three per triangle.
pub fn earcut(data: &[f64], hole_indices: &[usize]) -> Vec<usize> {
    let mut earcut = Earcut {
        nodes: Vec::with_capacity(data.len() / 2 * 3 / 2),
        triangles: Vec::with_capacity(data.len() / 2 * 3),
        min_x: 0.0,
        min_y: 0.0,
        inv_size: 0.0,
    };
    earcut.run(data, hole_indices);
    earcut.triangles
}

/// Relative difference between the triangulated area and the polygon area,
/// zero for an exact triangulation.
pub fn deviation(data: &[f64], hole_indices: &[usize], triangles: &[usize]) -> f64 {
    let outer_len = hole_indices.first().map(|&h| h * 2).unwrap_or(data.len());
    let mut polygon_area = signed_area(data, 0, outer_len).abs();

    for (idx, &hole) in hole_indices.iter().enumerate() {
        let start = hole * 2;
        let end = hole_indices
            .get(idx + 1)
            .map(|&h| h * 2)
            .unwrap_or(data.len());
        polygon_area -= signed_area(data, start, end).abs();
    }

    let mut triangles_area = 0.0;
    for t in triangles.chunks_exact(3) {
        let (a, b, c) = (t[0] * 2, t[1] * 2, t[2] * 2);
        triangles_area += ((data[a] - data[c]) * (data[b + 1] - data[a + 1])
            - (data[a] - data[b]) * (data[c + 1] - data[a + 1]))
            .abs();
    }

    if polygon_area == 0.0 && triangles_area == 0.0 {
        0.0
    } else {
        ((triangles_area - polygon_area) / polygon_area).abs()
    }
}

fn signed_area(data: &[f64], start: usize, end: usize) -> f64 {
    if end < start + 2 {
        return 0.0;
    }

    let mut sum = 0.0;
    let mut j = end - 2;
    for i in (start..end).step_by(2) {
        sum += (data[j] - data[i]) * (data[i + 1] + data[j + 1]);
        j = i;
    }
    sum
}

fn point_in_triangle(a: (f64, f64), b: (f64, f64), c: (f64, f64), p: (f64, f64)) -> bool {
    (c.0 - p.0) * (a.1 - p.1) - (a.0 - p.0) * (c.1 - p.1) >= 0.0
        && (a.0 - p.0) * (b.1 - p.1) - (b.0 - p.0) * (a.1 - p.1) >= 0.0
        && (b.0 - p.0) * (c.1 - p.1) - (c.0 - p.0) * (b.1 - p.1) >= 0.0
}

fn sign(n: f64) -> i8 {
    if n > 0.0 {
        1
    } else if n < 0.0 {
        -1
    } else {
        0
    }
}

impl Earcut {
    fn run(&mut self, data: &[f64], hole_indices: &[usize]) {
        let outer_len = hole_indices
            .first()
            .map(|&h| h * 2)
            .unwrap_or(data.len())
            .min(data.len());

        let Some(mut outer) = self.linked_list(data, 0, outer_len, true) else {
            return;
        };

        if self.nodes[outer].next == self.nodes[outer].prev {
            return;
        }

        if !hole_indices.is_empty() {
            outer = self.eliminate_holes(data, hole_indices, outer);
        }

        if data.len() > HASH_THRESHOLD * 2 {
            let (mut min_x, mut min_y) = (data[0], data[1]);
            let (mut max_x, mut max_y) = (min_x, min_y);

            for p in data[..outer_len].chunks_exact(2) {
                min_x = min_x.min(p[0]);
                min_y = min_y.min(p[1]);
                max_x = max_x.max(p[0]);
                max_y = max_y.max(p[1]);
            }

            let size = (max_x - min_x).max(max_y - min_y);
            self.min_x = min_x;
            self.min_y = min_y;
            self.inv_size = if size != 0.0 { 32767.0 / size } else { 0.0 };
        }

        self.earcut_linked(Some(outer), 0);
    }

    fn hashed(&self) -> bool {
        self.inv_size != 0.0
    }

    fn xy(&self, n: usize) -> (f64, f64) {
        (self.nodes[n].x, self.nodes[n].y)
    }

    fn next(&self, n: usize) -> usize {
        self.nodes[n].next
    }

    fn prev(&self, n: usize) -> usize {
        self.nodes[n].prev
    }

    fn push_node(&mut self, i: usize, x: f64, y: f64) -> usize {
        let idx = self.nodes.len();
        self.nodes.push(Node {
            i,
            x,
            y,
            prev: idx,
            next: idx,
            z: 0,
            prev_z: NIL,
            next_z: NIL,
            steiner: false,
        });
        idx
    }

    fn insert_node(&mut self, i: usize, x: f64, y: f64, last: Option<usize>) -> usize {
        let p = self.push_node(i, x, y);

        if let Some(last) = last {
            let next = self.next(last);
            self.nodes[p].next = next;
            self.nodes[p].prev = last;
            self.nodes[next].prev = p;
            self.nodes[last].next = p;
        }

        p
    }

    fn remove_node(&mut self, p: usize) {
        let Node {
            prev,
            next,
            prev_z,
            next_z,
            ..
        } = self.nodes[p];

        self.nodes[next].prev = prev;
        self.nodes[prev].next = next;

        if prev_z != NIL {
            self.nodes[prev_z].next_z = next_z;
        }
        if next_z != NIL {
            self.nodes[next_z].prev_z = prev_z;
        }
    }

    fn linked_list(
        &mut self,
        data: &[f64],
        start: usize,
        end: usize,
        clockwise: bool,
    ) -> Option<usize> {
        let end = start + (end.saturating_sub(start) / 2) * 2;
        let mut last = None;

        if clockwise == (signed_area(data, start, end) > 0.0) {
            for i in (start..end).step_by(2) {
                last = Some(self.insert_node(i / 2, data[i], data[i + 1], last));
            }
        } else {
            for i in (start..end).step_by(2).rev() {
                last = Some(self.insert_node(i / 2, data[i], data[i + 1], last));
            }
        }

        if let Some(l) = last {
            let next = self.next(l);
            if self.equals(l, next) {
                self.remove_node(l);
                last = Some(next);
            }
        }

        last
    }

    fn equals(&self, a: usize, b: usize) -> bool {
        self.nodes[a].x == self.nodes[b].x && self.nodes[a].y == self.nodes[b].y
    }

    /// Twice the signed area of triangle `p q r`.
    fn area(&self, p: usize, q: usize, r: usize) -> f64 {
        let (p, q, r) = (&self.nodes[p], &self.nodes[q], &self.nodes[r]);
        (q.y - p.y) * (r.x - q.x) - (q.x - p.x) * (r.y - q.y)
    }

    fn filter_points(&mut self, start: usize, end: Option<usize>) -> usize {
        let mut end = end.unwrap_or(start);
        let mut p = start;

        loop {
            let mut again = false;
            let Node {
                prev,
                next,
                steiner,
                ..
            } = self.nodes[p];

            if !steiner && (self.equals(p, next) || self.area(prev, p, next) == 0.0) {
                self.remove_node(p);
                p = prev;
                end = prev;
                if p == self.next(p) {
                    break;
                }
                again = true;
            } else {
                p = next;
            }

            if !again && p == end {
                break;
            }
        }

        end
    }

    fn earcut_linked(&mut self, ear: Option<usize>, pass: u8) {
        let Some(mut ear) = ear else {
            return;
        };

        if pass == 0 && self.hashed() {
            self.index_curve(ear);
        }

        let mut stop = ear;

        while self.prev(ear) != self.next(ear) {
            let prev = self.prev(ear);
            let next = self.next(ear);

            let is_ear = if self.hashed() {
                self.is_ear_hashed(ear)
            } else {
                self.is_ear(ear)
            };

            if is_ear {
                let triangle = [self.nodes[prev].i, self.nodes[ear].i, self.nodes[next].i];
                self.triangles.extend(triangle);
                self.remove_node(ear);

                // skipping the next vertex leads to fewer sliver triangles
                ear = self.next(next);
                stop = ear;
                continue;
            }

            ear = next;

            if ear == stop {
                match pass {
                    0 => {
                        let ear = self.filter_points(ear, None);
                        self.earcut_linked(Some(ear), 1);
                    }
                    1 => {
                        let ear = self.filter_points(ear, None);
                        let ear = self.cure_local_intersections(ear);
                        self.earcut_linked(Some(ear), 2);
                    }
                    _ => self.split_earcut(ear),
                }
                break;
            }
        }
    }

    fn is_ear(&self, ear: usize) -> bool {
        let (a, b, c) = (self.prev(ear), ear, self.next(ear));

        if self.area(a, b, c) >= 0.0 {
            return false;
        }

        let (pa, pb, pc) = (self.xy(a), self.xy(b), self.xy(c));
        let mut p = self.next(c);
        while p != a {
            if point_in_triangle(pa, pb, pc, self.xy(p))
                && self.area(self.prev(p), p, self.next(p)) >= 0.0
            {
                return false;
            }
            p = self.next(p);
        }

        true
    }

    fn blocks_ear(&self, ear: usize, p: usize) -> bool {
        let (a, c) = (self.prev(ear), self.next(ear));
        p != a
            && p != c
            && point_in_triangle(self.xy(a), self.xy(ear), self.xy(c), self.xy(p))
            && self.area(self.prev(p), p, self.next(p)) >= 0.0
    }

    fn is_ear_hashed(&self, ear: usize) -> bool {
        let (a, b, c) = (self.prev(ear), ear, self.next(ear));

        if self.area(a, b, c) >= 0.0 {
            return false;
        }

        let (ax, ay) = self.xy(a);
        let (bx, by) = self.xy(b);
        let (cx, cy) = self.xy(c);

        let min_z = self.z_order(ax.min(bx).min(cx), ay.min(by).min(cy));
        let max_z = self.z_order(ax.max(bx).max(cx), ay.max(by).max(cy));

        let mut p = self.nodes[ear].prev_z;
        let mut n = self.nodes[ear].next_z;

        while p != NIL && self.nodes[p].z >= min_z && n != NIL && self.nodes[n].z <= max_z {
            if self.blocks_ear(ear, p) {
                return false;
            }
            p = self.nodes[p].prev_z;

            if self.blocks_ear(ear, n) {
                return false;
            }
            n = self.nodes[n].next_z;
        }

        while p != NIL && self.nodes[p].z >= min_z {
            if self.blocks_ear(ear, p) {
                return false;
            }
            p = self.nodes[p].prev_z;
        }

        while n != NIL && self.nodes[n].z <= max_z {
            if self.blocks_ear(ear, n) {
                return false;
            }
            n = self.nodes[n].next_z;
        }

        true
    }

    fn cure_local_intersections(&mut self, start: usize) -> usize {
        let mut start = start;
        let mut p = start;

        loop {
            let a = self.prev(p);
            let pn = self.next(p);
            let b = self.next(pn);

            if !self.equals(a, b)
                && self.intersects(a, p, pn, b)
                && self.locally_inside(a, b)
                && self.locally_inside(b, a)
            {
                let triangle = [self.nodes[a].i, self.nodes[p].i, self.nodes[b].i];
                self.triangles.extend(triangle);

                self.remove_node(p);
                self.remove_node(pn);

                p = b;
                start = b;
            }

            p = self.next(p);
            if p == start {
                break;
            }
        }

        self.filter_points(p, None)
    }

    fn split_earcut(&mut self, start: usize) {
        let mut a = start;

        loop {
            let mut b = self.next(self.next(a));

            while b != self.prev(a) {
                if self.nodes[a].i != self.nodes[b].i && self.is_valid_diagonal(a, b) {
                    let c = self.split_polygon(a, b);

                    let a = self.filter_points(a, Some(self.next(a)));
                    let c = self.filter_points(c, Some(self.next(c)));

                    self.earcut_linked(Some(a), 0);
                    self.earcut_linked(Some(c), 0);
                    return;
                }
                b = self.next(b);
            }

            a = self.next(a);
            if a == start {
                break;
            }
        }
    }

    fn eliminate_holes(&mut self, data: &[f64], hole_indices: &[usize], outer: usize) -> usize {
        let mut queue = Vec::with_capacity(hole_indices.len());

        for (idx, &hole) in hole_indices.iter().enumerate() {
            let start = hole * 2;
            let end = hole_indices
                .get(idx + 1)
                .map(|&h| h * 2)
                .unwrap_or(data.len())
                .min(data.len());

            if let Some(list) = self.linked_list(data, start, end, false) {
                if list == self.next(list) {
                    self.nodes[list].steiner = true;
                }
                queue.push(self.leftmost(list));
            }
        }

        queue.sort_by(|&a, &b| self.nodes[a].x.total_cmp(&self.nodes[b].x));

        let mut outer = outer;
        for hole in queue {
            outer = self.eliminate_hole(hole, outer);
        }
        outer
    }

    fn eliminate_hole(&mut self, hole: usize, outer: usize) -> usize {
        let Some(bridge) = self.find_hole_bridge(hole, outer) else {
            return outer;
        };

        let bridge_reverse = self.split_polygon(bridge, hole);
        self.filter_points(bridge_reverse, Some(self.next(bridge_reverse)));
        self.filter_points(bridge, Some(self.next(bridge)))
    }

    /// David Eberly's hole bridging: cast a ray left from the hole's leftmost
    /// point and connect to the closest visible outer vertex.
    fn find_hole_bridge(&self, hole: usize, outer: usize) -> Option<usize> {
        let (hx, hy) = self.xy(hole);
        let mut qx = f64::NEG_INFINITY;
        let mut m = None;

        let mut p = outer;
        loop {
            let (px, py) = self.xy(p);
            let (nx, ny) = self.xy(self.next(p));

            if hy <= py && hy >= ny && ny != py {
                let x = px + (hy - py) * (nx - px) / (ny - py);
                if x <= hx && x > qx {
                    qx = x;
                    if x == hx {
                        if hy == py {
                            return Some(p);
                        }
                        if hy == ny {
                            return Some(self.next(p));
                        }
                    }
                    m = Some(if px < nx { p } else { self.next(p) });
                }
            }

            p = self.next(p);
            if p == outer {
                break;
            }
        }

        let mut m = m?;

        if hx == qx {
            return Some(m);
        }

        let stop = m;
        let (mx, my) = self.xy(m);
        let mut tan_min = f64::INFINITY;

        let mut p = m;
        loop {
            let (px, py) = self.xy(p);

            if hx >= px
                && px >= mx
                && hx != px
                && point_in_triangle(
                    (if hy < my { hx } else { qx }, hy),
                    (mx, my),
                    (if hy < my { qx } else { hx }, hy),
                    (px, py),
                )
            {
                let tan = (hy - py).abs() / (hx - px);
                let m_x = self.nodes[m].x;

                if self.locally_inside(p, hole)
                    && (tan < tan_min
                        || (tan == tan_min
                            && (px > m_x || (px == m_x && self.sector_contains_sector(m, p)))))
                {
                    m = p;
                    tan_min = tan;
                }
            }

            p = self.next(p);
            if p == stop {
                break;
            }
        }

        Some(m)
    }

    fn sector_contains_sector(&self, m: usize, p: usize) -> bool {
        self.area(self.prev(m), m, self.prev(p)) < 0.0 && self.area(self.next(p), m, self.next(m)) < 0.0
    }

    fn leftmost(&self, start: usize) -> usize {
        let mut p = start;
        let mut leftmost = start;

        loop {
            let (px, py) = self.xy(p);
            let (lx, ly) = self.xy(leftmost);
            if px < lx || (px == lx && py < ly) {
                leftmost = p;
            }
            p = self.next(p);
            if p == start {
                break;
            }
        }

        leftmost
    }

    fn z_order(&self, x: f64, y: f64) -> u32 {
        let mut x = ((x - self.min_x) * self.inv_size) as u32;
        let mut y = ((y - self.min_y) * self.inv_size) as u32;

        x = (x | (x << 8)) & 0x00FF_00FF;
        x = (x | (x << 4)) & 0x0F0F_0F0F;
        x = (x | (x << 2)) & 0x3333_3333;
        x = (x | (x << 1)) & 0x5555_5555;

        y = (y | (y << 8)) & 0x00FF_00FF;
        y = (y | (y << 4)) & 0x0F0F_0F0F;
        y = (y | (y << 2)) & 0x3333_3333;
        y = (y | (y << 1)) & 0x5555_5555;

        x | (y << 1)
    }

    fn index_curve(&mut self, start: usize) {
        let mut p = start;
        loop {
            let (x, y) = self.xy(p);
            let z = self.z_order(x, y);
            let node = &mut self.nodes[p];
            node.z = z;
            node.prev_z = node.prev;
            node.next_z = node.next;
            p = node.next;
            if p == start {
                break;
            }
        }

        let tail = self.nodes[p].prev_z;
        self.nodes[tail].next_z = NIL;
        self.nodes[p].prev_z = NIL;

        self.sort_linked(p);
    }

    /// Simon Tatham's linked list merge sort over the z-order links.
    fn sort_linked(&mut self, list: usize) {
        let mut list = list;
        let mut in_size = 1;

        loop {
            let mut p = list;
            list = NIL;
            let mut tail = NIL;
            let mut num_merges = 0;

            while p != NIL {
                num_merges += 1;
                let mut q = p;
                let mut p_size = 0;
                for _ in 0..in_size {
                    p_size += 1;
                    q = self.nodes[q].next_z;
                    if q == NIL {
                        break;
                    }
                }
                let mut q_size = in_size;

                while p_size > 0 || (q_size > 0 && q != NIL) {
                    let e;
                    if p_size != 0 && (q_size == 0 || q == NIL || self.nodes[p].z <= self.nodes[q].z)
                    {
                        e = p;
                        p = self.nodes[p].next_z;
                        p_size -= 1;
                    } else {
                        e = q;
                        q = self.nodes[q].next_z;
                        q_size -= 1;
                    }

                    if tail != NIL {
                        self.nodes[tail].next_z = e;
                    } else {
                        list = e;
                    }

                    self.nodes[e].prev_z = tail;
                    tail = e;
                }

                p = q;
            }

            if tail != NIL {
                self.nodes[tail].next_z = NIL;
            }

            if num_merges <= 1 {
                break;
            }
            in_size *= 2;
        }
    }

    fn on_segment(&self, p: usize, q: usize, r: usize) -> bool {
        let (px, py) = self.xy(p);
        let (qx, qy) = self.xy(q);
        let (rx, ry) = self.xy(r);
        qx <= px.max(rx) && qx >= px.min(rx) && qy <= py.max(ry) && qy >= py.min(ry)
    }

    fn intersects(&self, p1: usize, q1: usize, p2: usize, q2: usize) -> bool {
        let o1 = sign(self.area(p1, q1, p2));
        let o2 = sign(self.area(p1, q1, q2));
        let o3 = sign(self.area(p2, q2, p1));
        let o4 = sign(self.area(p2, q2, q1));

        (o1 != o2 && o3 != o4)
            || (o1 == 0 && self.on_segment(p1, p2, q1))
            || (o2 == 0 && self.on_segment(p1, q2, q1))
            || (o3 == 0 && self.on_segment(p2, p1, q2))
            || (o4 == 0 && self.on_segment(p2, q1, q2))
    }

    fn intersects_polygon(&self, a: usize, b: usize) -> bool {
        let (ai, bi) = (self.nodes[a].i, self.nodes[b].i);
        let mut p = a;

        loop {
            let next = self.next(p);
            let (pi, ni) = (self.nodes[p].i, self.nodes[next].i);
            if pi != ai && ni != ai && pi != bi && ni != bi && self.intersects(p, next, a, b) {
                return true;
            }
            p = next;
            if p == a {
                return false;
            }
        }
    }

    fn locally_inside(&self, a: usize, b: usize) -> bool {
        let (prev, next) = (self.prev(a), self.next(a));
        if self.area(prev, a, next) < 0.0 {
            self.area(a, b, next) >= 0.0 && self.area(a, prev, b) >= 0.0
        } else {
            self.area(a, b, prev) < 0.0 || self.area(a, next, b) < 0.0
        }
    }

    fn middle_inside(&self, a: usize, b: usize) -> bool {
        let (ax, ay) = self.xy(a);
        let (bx, by) = self.xy(b);
        let (px, py) = ((ax + bx) / 2.0, (ay + by) / 2.0);

        let mut inside = false;
        let mut p = a;
        loop {
            let (x, y) = self.xy(p);
            let (nx, ny) = self.xy(self.next(p));
            if (y > py) != (ny > py) && ny != y && px < (nx - x) * (py - y) / (ny - y) + x {
                inside = !inside;
            }
            p = self.next(p);
            if p == a {
                return inside;
            }
        }
    }

    fn is_valid_diagonal(&self, a: usize, b: usize) -> bool {
        let (ap, an) = (self.prev(a), self.next(a));
        let (bp, bn) = (self.prev(b), self.next(b));
        let bi = self.nodes[b].i;

        self.nodes[an].i != bi
            && self.nodes[ap].i != bi
            && !self.intersects_polygon(a, b)
            && ((self.locally_inside(a, b)
                && self.locally_inside(b, a)
                && self.middle_inside(a, b)
                && (self.area(ap, a, bp) != 0.0 || self.area(a, bp, b) != 0.0))
                || (self.equals(a, b) && self.area(ap, a, an) > 0.0 && self.area(bp, b, bn) > 0.0))
    }

    /// Links `a` to `b` with a diagonal, splitting the ring in two. Returns the
    /// copy of `b` that heads the second ring.
    fn split_polygon(&mut self, a: usize, b: usize) -> usize {
        let (ai, ax, ay) = (self.nodes[a].i, self.nodes[a].x, self.nodes[a].y);
        let (bi, bx, by) = (self.nodes[b].i, self.nodes[b].x, self.nodes[b].y);
        let a2 = self.push_node(ai, ax, ay);
        let b2 = self.push_node(bi, bx, by);
        let an = self.next(a);
        let bp = self.prev(b);

        self.nodes[a].next = b;
        self.nodes[b].prev = a;

        self.nodes[a2].next = an;
        self.nodes[an].prev = a2;

        self.nodes[a2].prev = b2;
        self.nodes[b2].next = a2;

        self.nodes[b2].prev = bp;
        self.nodes[bp].next = b2;

        b2
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    fn check(data: &[f64], holes: &[usize], expected_triangles: Option<usize>) -> Vec<usize> {
        let triangles = earcut(data, holes);
        assert_eq!(triangles.len() % 3, 0);
        assert!(triangles.iter().all(|&i| i < data.len() / 2));
        if let Some(n) = expected_triangles {
            assert_eq!(triangles.len() / 3, n);
        }
        assert_abs_diff_eq!(deviation(data, holes, &triangles), 0.0, epsilon = 1e-9);
        triangles
    }

    #[test]
    fn triangle_with_closing_point() {
        let data = [0.0, 0.0, 10.0, 0.0, 0.0, 10.0, 0.0, 0.0];
        let triangles = check(&data, &[], Some(1));
        let mut sorted = triangles.clone();
        sorted.sort();
        assert_eq!(sorted, vec![0, 1, 2]);
    }

    #[test]
    fn square() {
        let data = [0.0, 0.0, 10.0, 0.0, 10.0, 10.0, 0.0, 10.0];
        check(&data, &[], Some(2));
    }

    #[test]
    fn square_with_hole() {
        let data = [
            0.0, 0.0, 10.0, 0.0, 10.0, 10.0, 0.0, 10.0, //
            3.0, 3.0, 3.0, 7.0, 7.0, 7.0, 7.0, 3.0,
        ];
        check(&data, &[4], Some(8));
    }

    #[test]
    fn concave_polygon() {
        let data = [
            0.0, 0.0, 10.0, 0.0, 10.0, 10.0, 5.0, 2.0, 0.0, 10.0,
        ];
        check(&data, &[], Some(3));
    }

    #[test]
    fn degenerate_input() {
        assert!(earcut(&[0.0, 0.0, 5.0, 0.0, 10.0, 0.0], &[]).is_empty());
        assert!(earcut(&[0.0, 0.0, 1.0, 1.0], &[]).is_empty());
        assert!(earcut(&[], &[]).is_empty());
    }

    fn comb(teeth: usize) -> Vec<f64> {
        let mut data = vec![0.0, 0.0];
        for i in 0..teeth {
            let x = i as f64 * 10.0;
            data.extend([x + 5.0, 50.0, x + 10.0, 0.0]);
        }
        let width = teeth as f64 * 10.0;
        data.extend([width, -20.0, 0.0, -20.0]);
        data
    }

    #[test]
    fn large_concave_polygon_uses_hashing() {
        let data = comb(40);
        assert!(data.len() > HASH_THRESHOLD * 2);
        let n = data.len() / 2;
        check(&data, &[], Some(n - 2));
    }

    #[test]
    fn many_holes() {
        let mut data = vec![0.0, 0.0, 1000.0, 0.0, 1000.0, 1000.0, 0.0, 1000.0];
        let mut holes = Vec::new();
        for i in 0..9 {
            for j in 0..9 {
                holes.push(data.len() / 2);
                let (x, y) = (20.0 + i as f64 * 100.0, 20.0 + j as f64 * 100.0);
                data.extend([x, y, x, y + 50.0, x + 50.0, y + 50.0, x + 50.0, y]);
            }
        }
        check(&data, &holes, None);
    }

    #[test]
    fn flatten_records_hole_starts() {
        use crate::geometry::TilePoint;
        let ring = |pts: &[(i32, i32)]| pts.iter().map(|&(x, y)| TilePoint::new(x, y)).collect();
        let (data, holes) = flatten(&[ring(&[(0, 0), (4, 0), (4, 4)]), ring(&[(1, 1), (2, 1), (2, 2)])]);
        assert_eq!(data.len(), 12);
        assert_eq!(holes, vec![3]);
    }
}
