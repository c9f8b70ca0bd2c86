use anyhow::Result;
use clap::{Parser, Subcommand};
use serde_json::json;

#[derive(Debug, Parser)]
#[command(name = "warroom", about = "War Room operator console")]
struct Cli {
    #[arg(long, default_value = "http://127.0.0.1:8900")]
    server: String,
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Submit a proposal for review.
    Propose {
        #[arg(long)]
        title: String,
        #[arg(long)]
        description: Option<String>,
        #[arg(long)]
        domain: Option<String>,
        #[arg(long)]
        risk: Option<String>,
        #[arg(long)]
        project: Option<String>,
    },
    /// Approve a pending proposal, creating its task and mission.
    Approve {
        id: String,
        #[arg(long)]
        project: Option<String>,
    },
    /// Reject a pending proposal.
    Reject { id: String },
    /// List missions, newest first.
    Missions,
    /// Dispatch a queued mission to the engine.
    Execute { id: String },
    /// Show dashboard counters.
    Status,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();
    let client = reqwest::Client::new();

    match cli.command {
        Command::Propose { title, description, domain, risk, project } => {
            let mut body = json!({ "title": title });
            if let Some(description) = description {
                body["description"] = json!(description);
            }
            if let Some(domain) = domain {
                body["domain"] = json!(domain);
            }
            if let Some(risk) = risk {
                body["risk_level"] = json!(risk);
            }
            if let Some(project) = project {
                body["project_id"] = json!(project);
            }
            let response = client
                .post(format!("{}/v1/proposals", cli.server))
                .json(&body)
                .send()
                .await?;
            print_response(response).await?;
        }
        Command::Approve { id, project } => {
            let mut body = json!({ "action": "approve" });
            if let Some(project) = project {
                body["project_id"] = json!(project);
            }
            let response = client
                .patch(format!("{}/v1/proposals/{id}", cli.server))
                .json(&body)
                .send()
                .await?;
            print_response(response).await?;
        }
        Command::Reject { id } => {
            let response = client
                .patch(format!("{}/v1/proposals/{id}", cli.server))
                .json(&json!({ "action": "reject" }))
                .send()
                .await?;
            print_response(response).await?;
        }
        Command::Missions => {
            let response = client.get(format!("{}/v1/missions", cli.server)).send().await?;
            print_response(response).await?;
        }
        Command::Execute { id } => {
            let response = client
                .post(format!("{}/v1/missions/{id}/execute", cli.server))
                .send()
                .await?;
            print_response(response).await?;
        }
        Command::Status => {
            let response = client.get(format!("{}/v1/stats", cli.server)).send().await?;
            print_response(response).await?;
        }
    }

    Ok(())
}

async fn print_response(response: reqwest::Response) -> Result<()> {
    let status = response.status();
    let body: serde_json::Value = response.json().await?;
    println!("{}", serde_json::to_string_pretty(&body)?);
    if !status.is_success() {
        anyhow::bail!("request failed with status {status}");
    }
    Ok(())
}
