//! Builds the bid descriptor from a node's config, and expands the task
//! template. Rendering into the marketplace's actual wire document and the
//! templating engine itself are out of scope; this module does the one
//! substitution (`node_tag`) the spec names and nothing more.

use std::path::Path;

use crate::domain::NodeTag;
use crate::infrastructure::config::TaskConfig;
use crate::infrastructure::market::{BidDescriptor, TaskDescriptor};

/// Parses a duration string like `"0h"`, `"24h"`, `"30m"`. `"0h"` means
/// open-ended and is represented as `0`.
fn parse_duration_secs(duration: &str) -> u64 {
    let duration = duration.trim();
    let split_at = duration
        .char_indices()
        .find(|(_, c)| c.is_ascii_alphabetic())
        .map(|(i, _)| i)
        .unwrap_or(duration.len());
    let (digits, unit) = duration.split_at(split_at);
    let n: u64 = digits.parse().unwrap_or(0);
    match unit {
        "h" => n * 3600,
        "m" => n * 60,
        "d" => n * 86400,
        _ => n,
    }
}

pub fn build_bid(tag: &NodeTag, price_wei_per_sec: u128, task: &TaskConfig) -> BidDescriptor {
    BidDescriptor {
        duration_secs: parse_duration_secs(&task.duration),
        identity: task.identity.clone(),
        tag: tag.0.clone(),
        price_wei_per_sec,
        network: "outbound".to_string(),
        gpu_count: task.gpucount,
        gpu_mem: task.gpumem,
        eth_hashrate: task.ethhashrate,
        counterparty: task.counterparty.clone(),
    }
}

/// Serializes the bid descriptor's semantic fields to YAML and writes it
/// to `out/orders/<tag>.yaml`.
pub fn write_bid_file(out_dir: &Path, tag: &NodeTag, bid: &BidDescriptor) -> std::io::Result<()> {
    let doc = serde_yaml::to_string(&BidYaml::from(bid)).expect("bid descriptor always serializes");
    let dir = out_dir.join("orders");
    std::fs::create_dir_all(&dir)?;
    std::fs::write(dir.join(format!("{}.yaml", tag.0)), doc)
}

#[derive(serde::Serialize)]
struct BidYaml {
    duration: u64,
    identity: String,
    tag: String,
    price: String,
    resources: BidResourcesYaml,
    counterparty: Option<String>,
}

#[derive(serde::Serialize)]
struct BidResourcesYaml {
    network: String,
    benchmarks: BidBenchmarksYaml,
}

#[derive(serde::Serialize)]
struct BidBenchmarksYaml {
    gpucount: u32,
    gpumem: u64,
    ethhashrate: u64,
}

impl From<&BidDescriptor> for BidYaml {
    fn from(bid: &BidDescriptor) -> Self {
        BidYaml {
            duration: bid.duration_secs,
            identity: bid.identity.clone(),
            tag: bid.tag.clone(),
            price: bid.price_wei_per_sec.to_string(),
            resources: BidResourcesYaml {
                network: bid.network.clone(),
                benchmarks: BidBenchmarksYaml {
                    gpucount: bid.gpu_count,
                    gpumem: bid.gpu_mem,
                    ethhashrate: bid.eth_hashrate,
                },
            },
            counterparty: bid.counterparty.clone(),
        }
    }
}

/// Expands the task template, substituting every `{{ node_tag }}` token
/// with the node's tag.
pub fn build_task(template_path: &Path, tag: &NodeTag) -> std::io::Result<TaskDescriptor> {
    let template = std::fs::read_to_string(template_path)?;
    let rendered_yaml = template.replace("{{ node_tag }}", &tag.0);
    Ok(TaskDescriptor { rendered_yaml })
}

pub fn write_task_file(out_dir: &Path, tag: &NodeTag, task: &TaskDescriptor) -> std::io::Result<()> {
    let dir = out_dir.join("tasks");
    std::fs::create_dir_all(&dir)?;
    std::fs::write(dir.join(format!("{}.yaml", tag.0)), &task.rendered_yaml)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_task(gpucount: u32) -> TaskConfig {
        serde_yaml::from_str(&format!(
            "tag: gpu\nnumberofnodes: 1\ntemplate_file: task.yaml\nduration: \"24h\"\nidentity: anonymous\nramsize: 1024\nstoragesize: 10\ncpucores: 2\nsysbenchsingle: 1000\nsysbenchmulti: 2000\nnetdownload: 100\nnetupload: 100\ngpucount: {gpucount}\ngpumem: 4096\nethhashrate: 500\n"
        ))
        .unwrap()
    }

    #[test]
    fn build_bid_zeroes_gpu_fields_when_config_already_zeroed() {
        // gpucount: 0 in YAML triggers TaskConfig::validate's zeroing, but
        // this constructs the struct directly via serde so we mirror it.
        let mut task = sample_task(0);
        task.gpumem = 0;
        task.ethhashrate = 0;

        let bid = build_bid(&NodeTag::new("gpu_1"), 1000, &task);
        assert_eq!(bid.gpu_mem, 0);
        assert_eq!(bid.eth_hashrate, 0);
    }

    #[test]
    fn build_bid_converts_hour_duration_to_seconds() {
        let task = sample_task(1);
        let bid = build_bid(&NodeTag::new("gpu_1"), 1000, &task);
        assert_eq!(bid.duration_secs, 24 * 3600);
    }

    #[test]
    fn task_template_substitutes_node_tag() {
        let dir = tempfile::tempdir().unwrap();
        let template_path = dir.path().join("task.yaml");
        std::fs::write(&template_path, "container:\n  tag: {{ node_tag }}\n").unwrap();

        let task = build_task(&template_path, &NodeTag::new("gpu_3")).unwrap();
        assert_eq!(task.rendered_yaml, "container:\n  tag: gpu_3\n");
    }
}
