mod common;

use common::sqlite_store;
use propstore::repo::{ClientInput, ClientListQuery, ClientRepo, ProposalClients, RepoError};
use serde_json::json;
use tempfile::tempdir;

fn input(nome: &str, doc: &str) -> ClientInput {
    ClientInput {
        nome: nome.to_string(),
        cpf_cnpj: doc.to_string(),
        data: json!({"nome_proponente": nome, "cpf_cnpj_proponente": doc}),
        created_by: None,
    }
}

#[tokio::test]
async fn test_upsert_updates_existing_document() {
    let dir = tempdir().unwrap();
    let repo = ClientRepo::new(sqlite_store(dir.path()));

    let first = repo.upsert(&input("Maria", "11122233344")).await.unwrap().unwrap();
    let mut changed = input("Maria Silva", "11122233344");
    changed.data = json!({"estado_civil": "casada"});
    let second = repo.upsert(&changed).await.unwrap().unwrap();

    assert_eq!(first, second);
    assert_eq!(repo.count().await.unwrap(), 1);
    let client = repo.get(&first).await.unwrap().unwrap();
    assert_eq!(client.nome, "Maria Silva");
    assert_eq!(client.data, json!({"estado_civil": "casada"}));
    assert!(client.updated_at.is_some());
}

#[tokio::test]
async fn test_upsert_rejects_blank_fields() {
    let dir = tempdir().unwrap();
    let repo = ClientRepo::new(sqlite_store(dir.path()));
    let err = repo.upsert(&input("  ", "1")).await.unwrap_err();
    assert!(matches!(err, RepoError::Invalid(_)));
    assert_eq!(repo.count().await.unwrap(), 0);
}

#[tokio::test]
async fn test_list_pages_in_name_order() {
    let dir = tempdir().unwrap();
    let repo = ClientRepo::new(sqlite_store(dir.path()));
    for (nome, doc) in [("Carla", "3"), ("Ana", "1"), ("Bruno", "2")] {
        repo.upsert(&input(nome, doc)).await.unwrap();
    }

    let first = repo
        .list(&ClientListQuery {
            limit: 2,
            ..ClientListQuery::default()
        })
        .await
        .unwrap();
    let names: Vec<_> = first.clients.iter().map(|c| c.nome.as_str()).collect();
    assert_eq!(names, vec!["Ana", "Bruno"]);
    assert_eq!(first.total_count, 3);

    let second = repo
        .list(&ClientListQuery {
            page: 2,
            limit: 2,
            ..ClientListQuery::default()
        })
        .await
        .unwrap();
    assert_eq!(second.clients.len(), 1);
    assert_eq!(second.clients[0].nome, "Carla");
    assert_eq!(second.page, 2);
}

#[tokio::test]
async fn test_list_search_counts_only_matches() {
    let dir = tempdir().unwrap();
    let repo = ClientRepo::new(sqlite_store(dir.path()));
    repo.upsert(&input("Maria Silva", "11122233344")).await.unwrap();
    repo.upsert(&input("João Maria", "99988877766")).await.unwrap();
    repo.upsert(&input("Pedro", "55566677788")).await.unwrap();

    let page = repo
        .list(&ClientListQuery {
            search: Some("111".into()),
            ..ClientListQuery::default()
        })
        .await
        .unwrap();
    assert_eq!(page.total_count, 1);
    assert_eq!(page.clients[0].nome, "Maria Silva");
}

#[tokio::test]
async fn test_list_filters_by_creator() {
    let dir = tempdir().unwrap();
    let repo = ClientRepo::new(sqlite_store(dir.path()));
    let mut owned = input("Ana", "1");
    owned.created_by = Some(7);
    repo.upsert(&owned).await.unwrap();
    repo.upsert(&input("Bia", "2")).await.unwrap();

    let page = repo
        .list(&ClientListQuery {
            created_by: Some(7),
            ..ClientListQuery::default()
        })
        .await
        .unwrap();
    assert_eq!(page.total_count, 1);
    assert_eq!(page.clients[0].created_by, Some(7));
}

#[tokio::test]
async fn test_find_by_document_excludes_the_edited_client() {
    let dir = tempdir().unwrap();
    let repo = ClientRepo::new(sqlite_store(dir.path()));
    let id = repo.upsert(&input("Ana", "123")).await.unwrap().unwrap();

    let found = repo.find_by_document("123", None).await.unwrap().unwrap();
    assert_eq!(found.id.as_ref(), Some(&id));
    assert!(repo.find_by_document("123", Some(&id)).await.unwrap().is_none());
    assert!(repo.find_by_document("", None).await.unwrap().is_none());
}

#[tokio::test]
async fn test_delete_client() {
    let dir = tempdir().unwrap();
    let repo = ClientRepo::new(sqlite_store(dir.path()));
    let id = repo.upsert(&input("Ana", "1")).await.unwrap().unwrap();
    assert!(repo.delete(&id).await.unwrap());
    assert!(repo.get(&id).await.unwrap().is_none());
}

fn couple_proposal() -> serde_json::Value {
    json!({
        "nome_proponente": "Maria Silva",
        "cpf_cnpj_proponente": "11122233344",
        "tipo_pessoa": "PF",
        "has_segundo": true,
        "tipo_conjuge": true,
        "nome_segundo": "João Silva",
        "cpf_cnpj_segundo": "99988877766",
        "tipo_pessoa_segundo": "PF",
        "valor_proposta": 250000
    })
}

#[tokio::test]
async fn test_proposal_saves_both_proponents() {
    let dir = tempdir().unwrap();
    let repo = ClientRepo::new(sqlite_store(dir.path()));

    let saved = repo.save_from_proposal(&couple_proposal(), Some(7)).await.unwrap();
    let titular = repo.get(&saved.titular.unwrap()).await.unwrap().unwrap();
    let segundo = repo.get(&saved.segundo.unwrap()).await.unwrap().unwrap();

    assert_eq!(titular.nome, "Maria Silva");
    assert_eq!(titular.created_by, Some(7));
    assert_eq!(titular.data.get("nome_segundo"), None);
    assert_eq!(titular.data["has_segundo"], json!(false));
    assert_eq!(titular.data["valor_proposta"], json!(250000));

    assert_eq!(segundo.nome, "João Silva");
    assert_eq!(segundo.cpf_cnpj, "99988877766");
    assert_eq!(segundo.data["nome_segundo"], json!("Maria Silva"));
    assert_eq!(repo.count().await.unwrap(), 2);
}

#[tokio::test]
async fn test_proposal_keeps_link_when_asked() {
    let dir = tempdir().unwrap();
    let repo = ClientRepo::new(sqlite_store(dir.path()));
    let mut proposal = couple_proposal();
    proposal["salvar_vinculo_segundo"] = json!(true);

    let saved = repo.save_from_proposal(&proposal, None).await.unwrap();
    let titular = repo.get(&saved.titular.unwrap()).await.unwrap().unwrap();
    assert_eq!(titular.data["nome_segundo"], json!("João Silva"));
    assert_eq!(titular.data["has_segundo"], json!(true));
}

#[tokio::test]
async fn test_proposal_resave_updates_existing_clients() {
    let dir = tempdir().unwrap();
    let repo = ClientRepo::new(sqlite_store(dir.path()));
    let first = repo.save_from_proposal(&couple_proposal(), None).await.unwrap();

    let mut proposal = couple_proposal();
    proposal["nome_proponente"] = json!("Maria Silva Souza");
    let second = repo.save_from_proposal(&proposal, None).await.unwrap();

    assert_eq!(first, second);
    assert_eq!(repo.count().await.unwrap(), 2);
    let titular = repo.get(&second.titular.unwrap()).await.unwrap().unwrap();
    assert_eq!(titular.nome, "Maria Silva Souza");
}

#[tokio::test]
async fn test_proposal_without_second_proponent() {
    let dir = tempdir().unwrap();
    let repo = ClientRepo::new(sqlite_store(dir.path()));
    let mut proposal = couple_proposal();
    proposal["has_segundo"] = json!(false);

    let saved = repo.save_from_proposal(&proposal, None).await.unwrap();
    assert!(saved.titular.is_some());
    assert!(saved.segundo.is_none());
    assert_eq!(repo.count().await.unwrap(), 1);

    // No document: nothing to key the client on
    let anonymous = json!({"nome_proponente": "Sem Documento"});
    let saved = repo.save_from_proposal(&anonymous, None).await.unwrap();
    assert_eq!(saved, ProposalClients::default());

    let err = repo.save_from_proposal(&json!([1, 2]), None).await.unwrap_err();
    assert!(matches!(err, RepoError::Invalid(_)));
}
