//! Command-line parsing
//!
//! `meter-gate [--config PATH] <command> [args...]`. No command means `serve`.

use anyhow::{Context, Result, bail};
use usage_ledger::Month;

pub const USAGE: &str = "\
usage: meter-gate [--config PATH] <command>

commands:
  usage [--refresh]                          per-credential usage report
  summary [YYYY-MM]                          monthly ledger summary
  fetch TEMPLATE RESOURCE_KEY [name=value]   run one paginated fetch
  check PROVIDER ENDPOINT [COST]             evaluate a budget decision
  serve                                      status endpoints (default)";

#[derive(Debug, Clone, PartialEq)]
pub struct Cli {
    pub config_path: Option<String>,
    pub command: Command,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    Usage {
        refresh: bool,
    },
    Summary {
        month: Option<Month>,
    },
    Fetch {
        template: String,
        resource_key: String,
        params: Vec<(String, String)>,
    },
    Check {
        provider: String,
        endpoint: String,
        cost: Option<f64>,
    },
    Serve,
}

impl Cli {
    /// Parse arguments, excluding the program name.
    pub fn parse<I, S>(args: I) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut config_path = None;
        let mut rest = Vec::new();
        let mut args = args.into_iter().map(Into::into);

        while let Some(arg) = args.next() {
            if arg == "--config" {
                config_path = Some(args.next().context("--config needs a path")?);
            } else if let Some(path) = arg.strip_prefix("--config=") {
                config_path = Some(path.to_string());
            } else {
                rest.push(arg);
            }
        }

        let command = parse_command(&rest)?;
        Ok(Self {
            config_path,
            command,
        })
    }
}

fn parse_command(args: &[String]) -> Result<Command> {
    let Some((name, rest)) = args.split_first() else {
        return Ok(Command::Serve);
    };

    match name.as_str() {
        "usage" => {
            let mut refresh = false;
            for arg in rest {
                match arg.as_str() {
                    "--refresh" => refresh = true,
                    other => bail!("unexpected argument for usage: {other}"),
                }
            }
            Ok(Command::Usage { refresh })
        }
        "summary" => match rest {
            [] => Ok(Command::Summary { month: None }),
            [month] => {
                let month = month
                    .parse::<Month>()
                    .map_err(|e| anyhow::anyhow!(e))
                    .context("summary month must be YYYY-MM")?;
                Ok(Command::Summary { month: Some(month) })
            }
            _ => bail!("summary takes at most one month"),
        },
        "fetch" => {
            let [template, resource_key, params @ ..] = rest else {
                bail!("fetch needs TEMPLATE and RESOURCE_KEY");
            };
            let params = params
                .iter()
                .map(|p| {
                    p.split_once('=')
                        .filter(|(name, _)| !name.is_empty())
                        .map(|(name, value)| (name.to_string(), value.to_string()))
                        .with_context(|| format!("fetch parameter must be name=value, got: {p}"))
                })
                .collect::<Result<Vec<_>>>()?;
            Ok(Command::Fetch {
                template: template.clone(),
                resource_key: resource_key.clone(),
                params,
            })
        }
        "check" => {
            let (provider, endpoint, cost) = match rest {
                [provider, endpoint] => (provider, endpoint, None),
                [provider, endpoint, cost] => {
                    let cost: f64 = cost
                        .parse()
                        .with_context(|| format!("cost must be a number, got: {cost}"))?;
                    if !cost.is_finite() || cost < 0.0 {
                        bail!("cost must be a finite amount >= 0, got: {cost}");
                    }
                    (provider, endpoint, Some(cost))
                }
                _ => bail!("check needs PROVIDER and ENDPOINT"),
            };
            Ok(Command::Check {
                provider: provider.clone(),
                endpoint: endpoint.clone(),
                cost,
            })
        }
        "serve" if rest.is_empty() => Ok(Command::Serve),
        "serve" => bail!("serve takes no arguments"),
        other => bail!("unknown command: {other}\n\n{USAGE}"),
    }
}
