//! End-to-end placement scenarios on a partitioned MI300X.
