//! Mapping tables for the supported deployment targets

use std::fmt;

use crate::error::Result;
use crate::mapping::{FieldPath, MappingTable};
use crate::types::MetricKind;

/// Service a running exporter is bridging
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DeploymentTarget {
    /// HDFS data node
    DataNode,
    /// HDFS name node
    NameNode,
    /// ZooKeeper server
    ZooKeeper,
}

const DN_ACTIVITY: &str = "Hadoop:service=DataNode,name=DataNodeActivity-{host}-50010";
const DN_JVM: &str = "Hadoop:service=DataNode,name=JvmMetrics";

const NN_FS_NAMESYSTEM: &str = "Hadoop:service=NameNode,name=FSNamesystem";
const NN_FS_STATE: &str = "Hadoop:service=NameNode,name=FSNamesystemState";
const NN_ACTIVITY: &str = "Hadoop:service=NameNode,name=NameNodeActivity";
const NN_JVM: &str = "Hadoop:service=NameNode,name=JvmMetrics";
const NN_RPC_DETAILED: &str = "Hadoop:service=NameNode,name=RpcDetailedActivityForPort8020";
const GC_PAR_NEW: &str = "java.lang:type=GarbageCollector,name=ParNew";
const GC_CMS: &str = "java.lang:type=GarbageCollector,name=ConcurrentMarkSweep";
const JVM_MEMORY: &str = "java.lang:type=Memory";

impl DeploymentTarget {
    /// Short lowercase name, also the namespace of the exporter's own metrics
    pub fn name(&self) -> &'static str {
        match self {
            DeploymentTarget::DataNode => "datanode",
            DeploymentTarget::NameNode => "namenode",
            DeploymentTarget::ZooKeeper => "zookeeper",
        }
    }

    /// Human readable title for the landing page
    pub fn title(&self) -> &'static str {
        match self {
            DeploymentTarget::DataNode => "DataNode Exporter",
            DeploymentTarget::NameNode => "NameNode Exporter",
            DeploymentTarget::ZooKeeper => "ZooKeeper Exporter",
        }
    }

    /// Default listen address
    pub fn default_listen_address(&self) -> &'static str {
        match self {
            DeploymentTarget::DataNode => ":9077",
            DeploymentTarget::NameNode => ":9070",
            DeploymentTarget::ZooKeeper => ":9079",
        }
    }

    /// Default upstream: JMX URL or ZooKeeper host
    pub fn default_upstream(&self) -> &'static str {
        match self {
            DeploymentTarget::DataNode => "http://localhost:50075/jmx",
            DeploymentTarget::NameNode => "http://localhost:50070/jmx",
            DeploymentTarget::ZooKeeper => "localhost",
        }
    }

    /// Declarative table for this target
    pub fn mapping_table(&self) -> Result<MappingTable> {
        match self {
            DeploymentTarget::DataNode => datanode_table(),
            DeploymentTarget::NameNode => namenode_table(),
            DeploymentTarget::ZooKeeper => zookeeper_table(),
        }
    }
}

impl fmt::Display for DeploymentTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

fn datanode_table() -> Result<MappingTable> {
    MappingTable::builder(Some("datanode"))
        .gauges(
            Some(DN_ACTIVITY),
            &[
                "WritesFromRemoteClient",
                "WritesFromLocalClient",
                "WriteBlockOpNumOps",
                "VolumeFailures",
                "TotalWriteTime",
                "ReadBlockOpAvgTime",
                "HeartbeatsNumOps",
                "HeartbeatsAvgTime",
                "DatanodeNetworkErrors",
                "BytesWritten",
                "BlocksReplicated",
                "BlockReportsNumOps",
                "BlockReportsAvgTime",
            ],
        )
        .gauges(Some(DN_JVM), &["GcTimeMillis", "GcCount", "ThreadsBlocked"])
        .build()
}

fn namenode_table() -> Result<MappingTable> {
    let mut builder = MappingTable::builder(Some("namenode"))
        .gauges(
            Some(NN_FS_NAMESYSTEM),
            &[
                "MissingBlocks",
                "CapacityTotal",
                "CapacityUsed",
                "CapacityRemaining",
                "CapacityUsedNonDFS",
                "BlocksTotal",
                "FilesTotal",
                "CorruptBlocks",
                "ExcessBlocks",
                "StaleDataNodes",
                "TotalLoad",
                "ScheduledReplicationBlocks",
                "PendingReplicationBlocks",
            ],
        )
        .gauges(
            Some(NN_FS_STATE),
            &["VolumeFailuresTotal", "EstimatedCapacityLostTotal"],
        )
        .gauges(
            Some(NN_ACTIVITY),
            &[
                "TotalFileOps",
                "GetBlockLocations",
                "FilesCreated",
                "CreateFileOps",
                "CacheReportNumOps",
                "CacheReportAvgTime",
                "BlockReportNumOps",
                "BlockReportAvgTime",
                "AddBlockOps",
            ],
        )
        .gauges(
            Some(NN_JVM),
            &[
                "GcTimeMillis",
                "GcTimeMillisParNew",
                "GcTimeMillisConcurrentMarkSweep",
                "GcCount",
                "GcCountParNew",
                "GcCountConcurrentMarkSweep",
                "ThreadsBlocked",
            ],
        )
        .gauges(
            Some(NN_RPC_DETAILED),
            &["GetListingAvgTime", "GetFileInfoAvgTime"],
        );

    for (bean, prefix) in [(GC_PAR_NEW, "ParNew"), (GC_CMS, "ConcurrentMarkSweep")] {
        for field in ["CollectionCount", "CollectionTime"] {
            builder = builder.map(
                Some(bean),
                FieldPath::attribute(field),
                &format!("{}_{}", prefix, field),
                MetricKind::Counter,
            );
        }
    }

    for (child, name) in [
        ("committed", "heapMemoryUsageCommitted"),
        ("init", "heapMemoryUsageInit"),
        ("max", "heapMemoryUsageMax"),
        ("used", "heapMemoryUsageUsed"),
    ] {
        builder = builder.map(
            Some(JVM_MEMORY),
            FieldPath::nested("HeapMemoryUsage", child),
            name,
            MetricKind::Gauge,
        );
    }

    builder.build()
}

fn zookeeper_table() -> Result<MappingTable> {
    MappingTable::builder(None)
        .gauges(
            None,
            &[
                "zk_avg_latency",
                "zk_max_latency",
                "zk_min_latency",
                "zk_packets_received",
                "zk_packets_sent",
                "zk_num_alive_connections",
                "zk_outstanding_requests",
                "zk_znode_count",
                "zk_watch_count",
                "zk_ephemerals_count",
                "zk_approximate_data_size",
                "zk_open_file_descriptor_count",
                "zk_max_file_descriptor_count",
            ],
        )
        .build()
}
