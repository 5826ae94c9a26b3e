use glam::{Mat4, Vec3, Vec4};

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Aabb {
    pub min: Vec3,
    pub max: Vec3,
}

impl Aabb {
    pub fn new(min: Vec3, max: Vec3) -> Self {
        Self { min, max }
    }
}

/// Six inward-facing planes (`xyz` normal, `w` distance) plus the eight
/// corners of the view volume.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Frustum {
    pub planes: [Vec4; 6],
    pub corners: [Vec3; 8],
}

impl Frustum {
    /// Extracts the frustum of a view-projection matrix with a `0..1`
    /// depth range.
    pub fn from_view_projection(view_proj: Mat4) -> Self {
        let r0 = view_proj.row(0);
        let r1 = view_proj.row(1);
        let r2 = view_proj.row(2);
        let r3 = view_proj.row(3);

        let normalize = |p: Vec4| {
            let len = p.truncate().length();
            if len > f32::EPSILON {
                p / len
            } else {
                p
            }
        };
        let planes = [
            normalize(r3 + r0),
            normalize(r3 - r0),
            normalize(r3 + r1),
            normalize(r3 - r1),
            normalize(r2),
            normalize(r3 - r2),
        ];

        let inv = view_proj.inverse();
        let mut corners = [Vec3::ZERO; 8];
        for (i, corner) in corners.iter_mut().enumerate() {
            let ndc = Vec3::new(
                if i & 1 == 0 { -1.0 } else { 1.0 },
                if i & 2 == 0 { -1.0 } else { 1.0 },
                if i & 4 == 0 { 0.0 } else { 1.0 },
            );
            *corner = inv.project_point3(ndc);
        }

        Self { planes, corners }
    }

    /// `false` only when the box lies fully outside one plane.
    pub fn intersects_aabb(&self, aabb: &Aabb) -> bool {
        self.planes.iter().all(|plane| {
            let normal = plane.truncate();
            let positive = Vec3::select(normal.cmpge(Vec3::ZERO), aabb.max, aabb.min);
            normal.dot(positive) + plane.w >= 0.0
        })
    }

    pub fn contains_point(&self, point: Vec3) -> bool {
        self.planes
            .iter()
            .all(|plane| plane.truncate().dot(point) + plane.w >= 0.0)
    }
}

/// Culling input for one frame.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct View {
    pub frustum: Frustum,
    /// When set, culling decisions use this frustum instead.
    pub debug_frustum: Option<Frustum>,
}

impl View {
    pub fn new(view_proj: Mat4) -> Self {
        Self {
            frustum: Frustum::from_view_projection(view_proj),
            debug_frustum: None,
        }
    }

    pub fn with_debug_frustum(mut self, view_proj: Mat4) -> Self {
        self.debug_frustum = Some(Frustum::from_view_projection(view_proj));
        self
    }

    pub fn culling_frustum(&self) -> &Frustum {
        self.debug_frustum.as_ref().unwrap_or(&self.frustum)
    }
}
