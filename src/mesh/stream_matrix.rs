use crate::host::stream::StreamInfo;


/// Which pairs of a mesh's nodes are connected by which stream, indexed by the nodes' positions.
///
/// The matrix is symmetric: the stream between nodes i and j is found at (i, j) as well as at
///  (j, i). A node is never connected to itself, so the diagonal is always empty.
#[derive(Debug, Clone)]
pub struct StreamMatrix {
    size: usize,
    cells: Vec<Option<StreamInfo>>,
}

impl StreamMatrix {
    pub fn new(size: usize) -> StreamMatrix {
        StreamMatrix {
            size,
            cells: vec![None; size * size],
        }
    }

    /// Records the stream connecting nodes `i` and `j`, in both directions.
    ///
    /// panics if `i == j` or either index is out of bounds
    pub fn insert(&mut self, i: usize, j: usize, stream: StreamInfo) {
        assert_ne!(i, j, "a node can not be connected to itself");
        assert!(i < self.size && j < self.size, "index out of bounds");

        self.cells[i * self.size + j] = Some(stream.clone());
        self.cells[j * self.size + i] = Some(stream);
    }

    pub fn get(&self, i: usize, j: usize) -> Option<&StreamInfo> {
        if i >= self.size || j >= self.size {
            return None;
        }
        self.cells[i * self.size + j].as_ref()
    }

    /// all (i, j, stream) with i < j, in ascending order
    pub fn pairs(&self) -> impl Iterator<Item=(usize, usize, &StreamInfo)> + '_ {
        (0..self.size)
            .flat_map(move |i| (i+1..self.size).map(move |j| (i, j)))
            .filter_map(|(i, j)| self.get(i, j).map(|s| (i, j, s)))
    }

    /// number of distinct streams, i.e. of connected unordered pairs
    pub fn stream_count(&self) -> usize {
        self.pairs().count()
    }
}


#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_util::node::test_stream_info;

    #[test]
    fn test_symmetric_insert() {
        let mut matrix = StreamMatrix::new(3);
        matrix.insert(0, 2, test_stream_info(1, 3, 1));
        matrix.insert(1, 0, test_stream_info(2, 1, 2));

        assert_eq!(matrix.get(0, 2), Some(&test_stream_info(1, 3, 1)));
        assert_eq!(matrix.get(2, 0), Some(&test_stream_info(1, 3, 1)));
        assert_eq!(matrix.get(0, 1), matrix.get(1, 0));
        assert_eq!(matrix.get(1, 2), None);
        assert_eq!(matrix.get(3, 0), None);
        assert_eq!(matrix.stream_count(), 2);

        let pairs = matrix.pairs().map(|(i, j, _)| (i, j)).collect::<Vec<_>>();
        assert_eq!(pairs, vec![(0, 1), (0, 2)]);
    }

    #[test]
    fn test_empty_diagonal() {
        let matrix = StreamMatrix::new(4);
        for i in 0..4 {
            assert!(matrix.get(i, i).is_none());
        }
        assert_eq!(matrix.stream_count(), 0);
    }

    #[test]
    #[should_panic]
    fn test_self_stream_rejected() {
        let mut matrix = StreamMatrix::new(2);
        matrix.insert(1, 1, test_stream_info(1, 1, 1));
    }
}
