use crate::error::{Error, Result};
use crate::program::interp::WorkGeometry;

/// Upper bound for runtime-chosen work-group sizes.
const DEFAULT_GROUP_LIMIT: usize = 64;

/// N-dimensional index space of a kernel launch: 1 to 3 dimensions, an
/// optional work-group shape and an optional global offset.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NdRange {
    global: Vec<usize>,
    local: Option<Vec<usize>>,
    offset: Option<Vec<usize>>,
}

impl NdRange {
    pub fn new(global: &[usize]) -> Result<Self> {
        if global.is_empty() || global.len() > 3 {
            return Err(Error::InvalidWorkShape(format!(
                "work dimension must be 1..=3, got {}",
                global.len()
            )));
        }
        if let Some(d) = global.iter().position(|&n| n == 0) {
            return Err(Error::InvalidWorkShape(format!("global size of dimension {} is 0", d)));
        }
        Ok(Self {
            global: global.to_vec(),
            local: None,
            offset: None,
        })
    }

    /// Explicit work-group shape; it must divide the global shape.
    pub fn with_local(mut self, local: &[usize]) -> Result<Self> {
        self.check_dims("local", local)?;
        for (d, (&g, &l)) in self.global.iter().zip(local).enumerate() {
            if l == 0 {
                return Err(Error::InvalidWorkShape(format!("local size of dimension {} is 0", d)));
            }
            if g % l != 0 {
                return Err(Error::InvalidWorkShape(format!(
                    "local size {} does not divide global size {} in dimension {}",
                    l, g, d
                )));
            }
        }
        self.local = Some(local.to_vec());
        Ok(self)
    }

    pub fn with_offset(mut self, offset: &[usize]) -> Result<Self> {
        self.check_dims("offset", offset)?;
        self.offset = Some(offset.to_vec());
        Ok(self)
    }

    fn check_dims(&self, what: &str, shape: &[usize]) -> Result<()> {
        if shape.len() != self.global.len() {
            return Err(Error::InvalidWorkShape(format!(
                "{} has {} dimensions, global has {}",
                what,
                shape.len(),
                self.global.len()
            )));
        }
        Ok(())
    }

    pub fn dims(&self) -> usize {
        self.global.len()
    }

    pub fn global(&self) -> &[usize] {
        &self.global
    }

    pub fn local(&self) -> Option<&[usize]> {
        self.local.as_deref()
    }

    pub fn work_items(&self) -> usize {
        self.global.iter().product()
    }

    /// Fix the work-group shape for a device. Without an explicit local
    /// shape, dimension 0 gets the largest divisor of its global size not
    /// above `min(max_group, 64)` and the other dimensions get 1.
    pub(crate) fn resolve(&self, max_group: usize) -> Result<WorkGeometry> {
        let mut global = [1; 3];
        let mut local = [1; 3];
        let mut offset = [0; 3];
        global[..self.dims()].copy_from_slice(&self.global);

        match &self.local {
            Some(explicit) => {
                local[..self.dims()].copy_from_slice(explicit);
                let size: usize = explicit.iter().product();
                if size > max_group {
                    return Err(Error::InvalidWorkShape(format!(
                        "work-group of {} items exceeds the device maximum of {}",
                        size, max_group
                    )));
                }
            }
            None => {
                let limit = max_group.clamp(1, DEFAULT_GROUP_LIMIT);
                local[0] = (1..=limit.min(global[0]))
                    .rev()
                    .find(|l| global[0] % l == 0)
                    .unwrap_or(1);
            }
        }

        if let Some(o) = &self.offset {
            offset[..self.dims()].copy_from_slice(o);
        }

        Ok(WorkGeometry {
            dims: self.dims(),
            global,
            local,
            offset,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_shape_validation() {
        assert!(matches!(NdRange::new(&[]), Err(Error::InvalidWorkShape(_))));
        assert!(matches!(NdRange::new(&[1, 1, 1, 1]), Err(Error::InvalidWorkShape(_))));
        assert!(matches!(NdRange::new(&[8, 0]), Err(Error::InvalidWorkShape(_))));
        assert!(NdRange::new(&[8]).unwrap().with_local(&[3]).is_err());
        assert!(NdRange::new(&[8, 2]).unwrap().with_local(&[4]).is_err());
    }

    #[test]
    fn test_default_local_size() {
        let g = NdRange::new(&[96, 3]).unwrap().resolve(256).unwrap();
        assert_eq!(g.local, [48, 1, 1]);
        assert_eq!(g.global, [96, 3, 1]);
        assert_eq!(g.total_groups(), 2 * 3);

        let g = NdRange::new(&[7]).unwrap().resolve(4).unwrap();
        assert_eq!(g.local, [1, 1, 1]);
    }

    #[test]
    fn test_group_limit() {
        let range = NdRange::new(&[64, 64]).unwrap().with_local(&[16, 16]).unwrap();
        assert!(range.resolve(256).is_ok());
        assert!(matches!(range.resolve(128), Err(Error::InvalidWorkShape(_))));
    }
}
