//! Bucket, documents, knowledge base and data source
//!
//! Ingestion is started but never awaited: a knowledge base returned from
//! here exists, but its index may still be empty.

use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

use super::error::{ProvisionError, ProvisionResult, StepContext};
use super::roles::RoleBuilder;
use super::wait::{poll_until, Probe};
use super::Provisioner;
use crate::callback;
use crate::domain::error::CloudResultExt;
use crate::domain::naming::ResourceNames;
use crate::domain::policy::{PolicyDocument, RoleKind};
use crate::domain::resources::{
    DataSourceSpec, KnowledgeBase, KnowledgeBaseSpec, ResourceStatus, StorageBackend, VectorStoreSpec,
};

const JSON_CONTENT_TYPE: &str = "application/json";

pub async fn provision(prov: &Provisioner, names: &ResourceNames) -> ProvisionResult<KnowledgeBase> {
    create_bucket(prov, names).await?;
    upload_schema(prov, names).await?;
    upload_documents(prov, names).await?;

    let role = RoleBuilder::new(prov.clients.iam.as_ref(), names, prov.retry)
        .ensure_role(RoleKind::KnowledgeBase, &prov.policy_inputs(names, None))
        .await?;
    grant_secret_access(prov, names, &role.arn).await?;

    let (knowledge_base_id, knowledge_base_arn) = create_knowledge_base(prov, names, &role.arn).await?;
    let data_source_id = create_data_source(prov, names, &knowledge_base_id).await?;
    let ingestion_job_id = start_ingestion(prov, &knowledge_base_id, &data_source_id).await?;

    Ok(KnowledgeBase {
        id: knowledge_base_id,
        arn: knowledge_base_arn,
        embedding_model_arn: names.foundation_model_arn(&prov.settings.deployment.embedding_model),
        storage_backend: StorageBackend::Pinecone,
        data_source_id,
        ingestion_job_id,
    })
}

async fn create_bucket(prov: &Provisioner, names: &ResourceNames) -> ProvisionResult<()> {
    let bucket = names.bucket();
    let created = prov
        .retry
        .run("s3:CreateBucket", || prov.clients.storage.create_bucket(&bucket, names.region()))
        .await
        .tolerate_existing()
        .step(format!("create bucket {bucket}"))?;

    match created {
        Some(()) => info!(bucket = %bucket, "created bucket"),
        None => info!(bucket = %bucket, "bucket already exists"),
    }
    Ok(())
}

async fn upload_schema(prov: &Provisioner, names: &ResourceNames) -> ProvisionResult<()> {
    let body = match &prov.settings.deployment.schema_file {
        Some(path) => read_file(path).await?,
        None => serde_json::to_vec_pretty(&callback::api_schema())?,
    };
    put(prov, &names.bucket(), &names.schema_key(), body, JSON_CONTENT_TYPE).await
}

/// Upload every PDF of `documents_dir` and every configured URL under the document prefix
async fn upload_documents(prov: &Provisioner, names: &ResourceNames) -> ProvisionResult<()> {
    let deployment = &prov.settings.deployment;
    let bucket = names.bucket();

    if let Some(dir) = &deployment.documents_dir {
        for path in pdf_files(dir).await? {
            let Some(file_name) = path.file_name().and_then(|n| n.to_str()) else {
                warn!(path = %path.display(), "skipping document with a non UTF-8 name");
                continue;
            };
            let key = document_key(&deployment.document_prefix, file_name);
            let content_type = mime_guess::from_path(&path).first_or_octet_stream();
            let body = read_file(&path).await?;
            put(prov, &bucket, &key, body, content_type.as_ref()).await?;
        }
    }

    for url in &deployment.document_urls {
        let file_name = url_file_name(url)?;
        let key = document_key(&deployment.document_prefix, &file_name);
        let content_type = mime_guess::from_path(&file_name).first_or_octet_stream();
        let body = download(url).await?;
        put(prov, &bucket, &key, body, content_type.as_ref()).await?;
    }
    Ok(())
}

fn document_key(prefix: &str, file_name: &str) -> String {
    format!("{}/{}", prefix.trim_end_matches('/'), file_name)
}

async fn pdf_files(dir: &Path) -> ProvisionResult<Vec<PathBuf>> {
    let io_error = |source| ProvisionError::Io {
        path: dir.to_path_buf(),
        source,
    };
    let mut entries = tokio::fs::read_dir(dir).await.map_err(io_error)?;
    let mut files = Vec::new();
    while let Some(entry) = entries.next_entry().await.map_err(io_error)? {
        let path = entry.path();
        let is_pdf = path
            .extension()
            .and_then(|e| e.to_str())
            .is_some_and(|e| e.eq_ignore_ascii_case("pdf"));
        if is_pdf && path.is_file() {
            files.push(path);
        }
    }
    files.sort();
    Ok(files)
}

fn url_file_name(url: &str) -> ProvisionResult<String> {
    let parsed = reqwest::Url::parse(url)
        .map_err(|e| ProvisionError::Config(format!("invalid document url {url}: {e}")))?;
    parsed
        .path_segments()
        .and_then(|mut segments| segments.next_back())
        .filter(|name| !name.is_empty())
        .map(str::to_string)
        .ok_or_else(|| ProvisionError::Config(format!("document url {url} has no file name")))
}

async fn download(url: &str) -> ProvisionResult<Vec<u8>> {
    let download_error = |source| ProvisionError::Download {
        url: url.to_string(),
        source,
    };
    info!(url, "downloading document");
    let response = reqwest::get(url)
        .await
        .and_then(|r| r.error_for_status())
        .map_err(download_error)?;
    let bytes = response.bytes().await.map_err(download_error)?;
    Ok(bytes.to_vec())
}

async fn read_file(path: &Path) -> ProvisionResult<Vec<u8>> {
    tokio::fs::read(path).await.map_err(|source| ProvisionError::Io {
        path: path.to_path_buf(),
        source,
    })
}

async fn put(prov: &Provisioner, bucket: &str, key: &str, body: Vec<u8>, content_type: &str) -> ProvisionResult<()> {
    let size = body.len();
    prov.retry
        .run("s3:PutObject", || {
            prov.clients
                .storage
                .put_object(bucket, key, body.clone(), content_type)
        })
        .await
        .step(format!("upload {key}"))?;
    info!(bucket, key, size, "uploaded object");
    Ok(())
}

/// Let the knowledge-base role read the vector store credential
async fn grant_secret_access(prov: &Provisioner, names: &ResourceNames, role_arn: &str) -> ProvisionResult<()> {
    let secret_arn = names.secret_arn(&prov.settings.vector_store.credentials_secret);
    let policy = PolicyDocument::secret_access(role_arn, &secret_arn);
    prov.retry
        .run("secretsmanager:PutResourcePolicy", || {
            prov.clients.secrets.put_resource_policy(&secret_arn, &policy)
        })
        .await
        .step("grant secret access to the knowledge base role")?;
    info!(secret = %secret_arn, "granted secret access");
    Ok(())
}

/// Returns the id and ARN of the available knowledge base
async fn create_knowledge_base(
    prov: &Provisioner,
    names: &ResourceNames,
    role_arn: &str,
) -> ProvisionResult<(String, String)> {
    let agents = &prov.clients.agents;
    let vector_store = &prov.settings.vector_store;
    let spec = KnowledgeBaseSpec {
        name: names.knowledge_base(),
        description: format!("Knowledge base of {}", names.agent_name()),
        role_arn: role_arn.to_string(),
        embedding_model_arn: names.foundation_model_arn(&prov.settings.deployment.embedding_model),
        vector_store: VectorStoreSpec {
            connection_string: vector_store.connection_string.clone(),
            credentials_secret_arn: names.secret_arn(&vector_store.credentials_secret),
            namespace: vector_store.namespace.clone(),
            text_field: vector_store.text_field.clone(),
            metadata_field: vector_store.metadata_field.clone(),
        },
    };

    let created = prov
        .retry
        .run("bedrock:CreateKnowledgeBase", || agents.create_knowledge_base(&spec))
        .await
        .tolerate_existing()
        .step(format!("create knowledge base {}", spec.name))?;

    let id = match created {
        Some(state) => {
            info!(knowledge_base = %spec.name, id = %state.id, "created knowledge base");
            state.id
        }
        None => {
            let id = agents
                .find_knowledge_base(&spec.name)
                .await
                .step("look up knowledge base")?
                .ok_or_else(|| ProvisionError::NotDeployed(format!("knowledge base {}", spec.name)))?;
            info!(knowledge_base = %spec.name, id = %id, "reusing knowledge base");
            id
        }
    };

    let what = format!("knowledge base {id}");
    let arn = poll_until(&what, prov.resource_wait, || async {
        let state = agents.get_knowledge_base(&id).await.step("read knowledge base")?;
        Ok(match state.status {
            ResourceStatus::Available => Probe::Ready(state.arn),
            ResourceStatus::Failed => Probe::Failed(state.status.to_string()),
            other => Probe::Pending(other.to_string()),
        })
    })
    .await?;

    Ok((id, arn))
}

async fn create_data_source(prov: &Provisioner, names: &ResourceNames, knowledge_base_id: &str) -> ProvisionResult<String> {
    let agents = &prov.clients.agents;
    let spec = DataSourceSpec {
        knowledge_base_id: knowledge_base_id.to_string(),
        name: names.data_source(),
        description: format!("Documents of {}", names.agent_name()),
        bucket_arn: names.bucket_arn(),
        inclusion_prefixes: vec![prov.settings.deployment.document_prefix.clone()],
        chunking: prov.settings.chunking.policy(),
    };

    let created = prov
        .retry
        .run("bedrock:CreateDataSource", || agents.create_data_source(&spec))
        .await
        .tolerate_existing()
        .step(format!("create data source {}", spec.name))?;

    let id = match created {
        Some(state) => {
            info!(data_source = %spec.name, id = %state.id, "created data source");
            state.id
        }
        None => {
            let id = agents
                .find_data_source(knowledge_base_id, &spec.name)
                .await
                .step("look up data source")?
                .ok_or_else(|| ProvisionError::NotDeployed(format!("data source {}", spec.name)))?;
            info!(data_source = %spec.name, id = %id, "reusing data source");
            id
        }
    };

    let what = format!("data source {id}");
    poll_until(&what, prov.resource_wait, || async {
        let state = agents
            .get_data_source(knowledge_base_id, &id)
            .await
            .step("read data source")?;
        Ok(match state.status {
            ResourceStatus::Available => Probe::Ready(()),
            ResourceStatus::Failed => Probe::Failed(state.status.to_string()),
            other => Probe::Pending(other.to_string()),
        })
    })
    .await?;

    Ok(id)
}

/// Fire-and-forget; a job that is already running is not an error
async fn start_ingestion(prov: &Provisioner, knowledge_base_id: &str, data_source_id: &str) -> ProvisionResult<Option<String>> {
    let job = prov
        .retry
        .run("bedrock:StartIngestionJob", || {
            prov.clients
                .agents
                .start_ingestion_job(knowledge_base_id, data_source_id)
        })
        .await
        .tolerate_existing()
        .step("start ingestion job")?;

    match &job {
        Some(id) => info!(job = %id, "started ingestion job"),
        None => debug!("ingestion job already running"),
    }
    Ok(job)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_document_key() {
        assert_eq!(document_key("kbdocuments", "guide.pdf"), "kbdocuments/guide.pdf");
        assert_eq!(document_key("kbdocuments/", "guide.pdf"), "kbdocuments/guide.pdf");
    }

    #[test]
    fn test_url_file_name() {
        assert_eq!(
            url_file_name("https://docs.aws.amazon.com/pdfs/bedrock/latest/userguide/bedrock-ug.pdf").unwrap(),
            "bedrock-ug.pdf"
        );
        assert_eq!(url_file_name("https://example.com/a/guide.pdf?x=1").unwrap(), "guide.pdf");
        assert!(url_file_name("https://example.com/").is_err());
        assert!(url_file_name("not a url").is_err());
    }
}
