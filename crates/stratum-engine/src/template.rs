use serde::Serialize;

use crate::error::StackError;

const FLUENTD_OUTPUT_NAME: &str = "fluentd.conf";

// Credentials are read from the aggregator's environment at runtime and are
// never rendered into the config map.
const FLUENTD_OUTPUT_TEMPLATE: &str = r##"<source>
  @type forward
  bind 0.0.0.0
  port {{ forward_port }}
</source>

<match fluentd.healthcheck>
  @type stdout
</match>

<match **>
  @type elasticsearch
  include_tag_key true
  host "{{ host }}"
  port {{ port }}
  user "#{ENV['ELASTICSEARCH_USER']}"
  password "#{ENV['ELASTICSEARCH_PASSWORD']}"
  logstash_format true
  logstash_prefix {{ index_prefix }}
  <buffer>
    @type file
    path /opt/bitnami/fluentd/logs/buffers/logs.buffer
    flush_thread_count 2
    flush_interval {{ flush_interval_secs }}s
  </buffer>
</match>
"##;

/// Values substituted into the log shipper's search-engine output.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FluentdOutput {
    pub host: String,
    pub port: u16,
    pub forward_port: u16,
    pub index_prefix: String,
    pub flush_interval_secs: u32,
}

impl FluentdOutput {
    #[must_use]
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
            forward_port: 24224,
            index_prefix: "logstash".to_string(),
            flush_interval_secs: 5,
        }
    }
}

/// File name under which the rendered output lives in the config map.
#[must_use]
pub const fn fluentd_output_file() -> &'static str {
    FLUENTD_OUTPUT_NAME
}

/// # Errors
///
/// Returns an error when the template cannot be rendered.
pub fn render_fluentd_output(output: &FluentdOutput) -> Result<String, StackError> {
    let wrap = |source| StackError::Template {
        name: FLUENTD_OUTPUT_NAME,
        source,
    };
    let mut tera = tera::Tera::default();
    tera.add_raw_template(FLUENTD_OUTPUT_NAME, FLUENTD_OUTPUT_TEMPLATE)
        .map_err(wrap)?;
    let context = tera::Context::from_serialize(output).map_err(wrap)?;
    tera.render(FLUENTD_OUTPUT_NAME, &context).map_err(wrap)
}

#[cfg(test)]
mod tests {
    #![allow(clippy::expect_used)]

    use super::{FluentdOutput, render_fluentd_output};

    #[test]
    fn renders_search_engine_location() {
        let rendered = render_fluentd_output(&FluentdOutput::new(
            "elasticsearch.efk-logging.svc.cluster.local",
            9200,
        ))
        .expect("render");
        assert!(rendered.contains("host \"elasticsearch.efk-logging.svc.cluster.local\""));
        assert!(rendered.contains("port 9200"));
        assert!(rendered.contains("port 24224"));
        assert!(rendered.contains("flush_interval 5s"));
    }

    #[test]
    fn credentials_stay_environment_references() {
        let rendered =
            render_fluentd_output(&FluentdOutput::new("es.local", 9200)).expect("render");
        assert!(rendered.contains(r##"user "#{ENV['ELASTICSEARCH_USER']}""##));
        assert!(rendered.contains(r##"password "#{ENV['ELASTICSEARCH_PASSWORD']}""##));
        assert!(rendered.contains("logstash_prefix logstash"));
        assert!(rendered.ends_with("</match>\n"));
    }
}
