//! Simple-LOD quad buffers

use std::collections::HashMap;

use super::ParseError;
use super::types::{ParseQuadsResult, QuadInstance, QUAD_STRIDE_BYTES, QUAD_STRIDE_FLOATS};

/// Decode an f3d buffer. Its length must be a whole number of instances;
/// an empty buffer decodes to an empty result.
pub fn parse_quads(bytes: &[u8]) -> Result<ParseQuadsResult, ParseError> {
    if bytes.len() % QUAD_STRIDE_BYTES != 0 {
        return Err(ParseError::InvalidStride { len: bytes.len(), stride: QUAD_STRIDE_BYTES });
    }

    let data: Vec<f32> = bytemuck::pod_collect_to_vec(bytes);

    let mut tree_index_to_instances: HashMap<u32, Vec<u32>> = HashMap::new();
    for (i, instance) in data.chunks_exact(QUAD_STRIDE_FLOATS).enumerate() {
        let tree_index = instance[3];
        if !tree_index.is_finite() || tree_index < 0.0 {
            return Err(ParseError::InvalidGeometry(format!(
                "quad {} has invalid tree index {}", i, tree_index
            )));
        }
        tree_index_to_instances.entry(tree_index as u32).or_default().push(i as u32);
    }

    Ok(ParseQuadsResult { data, tree_index_to_instances })
}

/// Encode quad instances as an f3d buffer.
pub fn encode_quads(instances: &[QuadInstance]) -> Vec<u8> {
    bytemuck::cast_slice(instances).to_vec()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn instance(tree_index: u32) -> QuadInstance {
        QuadInstance {
            offset: [1.0, 2.0, 3.0],
            tree_index: tree_index as f32,
            normal: [0.0, 1.0, 0.0],
            matrix: glam::Mat4::IDENTITY.to_cols_array(),
        }
    }

    #[test]
    fn test_empty_buffer_is_valid() {
        let result = parse_quads(&[]).unwrap();
        assert_eq!(result.instance_count(), 0);
        assert!(result.instances().is_empty());
    }

    #[test]
    fn test_rejects_partial_instance() {
        let bytes = vec![0u8; QUAD_STRIDE_BYTES + 4];
        assert_eq!(
            parse_quads(&bytes),
            Err(ParseError::InvalidStride { len: 96, stride: 92 })
        );
    }

    #[test]
    fn test_decode_instances() {
        let bytes = encode_quads(&[instance(7), instance(9), instance(7)]);
        assert_eq!(bytes.len(), 3 * 92);

        let result = parse_quads(&bytes).unwrap();
        assert_eq!(result.instance_count(), 3);
        assert_eq!(result.instances()[1], instance(9));
        assert_eq!(result.tree_index_to_instances[&7], vec![0, 2]);
        assert_eq!(result.tree_index_to_instances[&9], vec![1]);
    }

    #[test]
    fn test_negative_tree_index() {
        let mut bad = instance(0);
        bad.tree_index = -1.0;
        assert!(matches!(parse_quads(&encode_quads(&[bad])), Err(ParseError::InvalidGeometry(_))));
    }
}
