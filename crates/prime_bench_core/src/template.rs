//! Renders a [`DeploymentPlan`] as an AWS CloudFormation template.
//!
//! Rendering is pure: artifacts are expected in the bucket named by the
//! `ArtifactBucket` template parameter under [`ArtifactRef::object_key`].
//!
//! [`ArtifactRef::object_key`]: crate::deployment::ArtifactRef::object_key

use serde_json::{json, Map, Value};
use sha2::{Digest, Sha256};

use crate::deployment::{ComputeUnitPlan, DeploymentPlan, Grant};

pub const ARTIFACT_BUCKET_PARAMETER: &str = "ArtifactBucket";
pub const TEMPLATE_FORMAT_VERSION: &str = "2010-09-09";
pub const TEMPLATE_DESCRIPTION: &str =
    "Prime numbers counter benchmark: one scheduled function per runtime and architecture";

const BASIC_EXECUTION_POLICY: &str = "service-role/AWSLambdaBasicExecutionRole";
const LOG_WRITE_ACTIONS: [&str; 2] = ["logs:CreateLogStream", "logs:PutLogEvents"];
const PARAMETER_READ_ACTIONS: [&str; 4] = [
    "ssm:DescribeParameters",
    "ssm:GetParameters",
    "ssm:GetParameter",
    "ssm:GetParameterHistory",
];

/// Stable CloudFormation logical id for a construct path.
///
/// The alphanumeric characters of the path are kept for readability and an
/// eight character digest of the full path keeps ids unique.
pub fn logical_id(path: &[&str]) -> String {
    let readable: String = path
        .iter()
        .flat_map(|part| part.chars())
        .filter(char::is_ascii_alphanumeric)
        .collect();

    let mut hasher = Sha256::new();
    hasher.update(path.join("/"));
    let digest = format!("{:X}", hasher.finalize());

    format!("{readable}{}", &digest[..8])
}

struct UnitIds {
    log_group: String,
    role: String,
    function: String,
    rule: String,
    permission: String,
}

impl UnitIds {
    fn for_unit(unit: &ComputeUnitPlan) -> Self {
        let id = unit.variant_id.as_str();
        Self {
            log_group: logical_id(&[id, "LogGroup"]),
            role: logical_id(&[id, "ServiceRole"]),
            function: logical_id(&[id, "Function"]),
            rule: logical_id(&[id, "ScheduleRule"]),
            permission: logical_id(&[id, "ScheduleRule", "InvokePermission"]),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TemplateError {
    logical_id: String,
}

impl TemplateError {
    pub fn logical_id(&self) -> &str {
        &self.logical_id
    }
}

impl std::fmt::Display for TemplateError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "logical id '{}' is rendered more than once", self.logical_id)
    }
}

impl std::error::Error for TemplateError {}

fn insert_resource(
    resources: &mut Map<String, Value>,
    logical_id: String,
    resource: Value,
) -> Result<(), TemplateError> {
    if resources.contains_key(&logical_id) {
        return Err(TemplateError { logical_id });
    }
    resources.insert(logical_id, resource);
    Ok(())
}

/// Renders every resource of `plan`, refusing to emit two resources under
/// one logical id.
pub fn render_template(plan: &DeploymentPlan) -> Result<Value, TemplateError> {
    let mut resources = Map::new();

    let parameter_id = logical_id(&["Parameter", plan.parameter.name.as_str()]);
    insert_resource(
        &mut resources,
        parameter_id.clone(),
        json!({
            "Type": "AWS::SSM::Parameter",
            "Properties": {
                "Name": plan.parameter.name,
                "Type": "String",
                "Value": plan.parameter.default_value,
            }
        }),
    )?;

    for unit in &plan.units {
        let ids = UnitIds::for_unit(unit);
        render_unit(unit, &ids, &parameter_id, &mut resources)?;
    }

    Ok(json!({
        "AWSTemplateFormatVersion": TEMPLATE_FORMAT_VERSION,
        "Description": TEMPLATE_DESCRIPTION,
        "Parameters": {
            ARTIFACT_BUCKET_PARAMETER: {
                "Type": "String",
                "Description": "S3 bucket holding the packaged function artifacts",
            }
        },
        "Resources": Value::Object(resources),
    }))
}

fn render_unit(
    unit: &ComputeUnitPlan,
    ids: &UnitIds,
    parameter_id: &str,
    resources: &mut Map<String, Value>,
) -> Result<(), TemplateError> {
    let function = &unit.function;

    insert_resource(
        resources,
        ids.log_group.clone(),
        json!({
            "Type": "AWS::Logs::LogGroup",
            "Properties": {
                "LogGroupName": unit.log_group.name,
                "RetentionInDays": unit.log_group.retention.days(),
            },
            "UpdateReplacePolicy": "Retain",
            "DeletionPolicy": "Retain",
        }),
    )?;

    let statements: Vec<Value> = unit
        .grants
        .iter()
        .map(|grant| grant_statement(grant, ids, parameter_id))
        .collect();

    insert_resource(
        resources,
        ids.role.clone(),
        json!({
            "Type": "AWS::IAM::Role",
            "Properties": {
                "AssumeRolePolicyDocument": {
                    "Version": "2012-10-17",
                    "Statement": [{
                        "Effect": "Allow",
                        "Principal": { "Service": "lambda.amazonaws.com" },
                        "Action": "sts:AssumeRole",
                    }]
                },
                "ManagedPolicyArns": [{
                    "Fn::Sub": format!("arn:${{AWS::Partition}}:iam::aws:policy/{BASIC_EXECUTION_POLICY}")
                }],
                "Policies": [{
                    "PolicyName": format!("{}-grants", function.name),
                    "PolicyDocument": {
                        "Version": "2012-10-17",
                        "Statement": statements,
                    }
                }]
            }
        }),
    )?;

    insert_resource(
        resources,
        ids.function.clone(),
        json!({
            "Type": "AWS::Lambda::Function",
            "Properties": {
                "FunctionName": function.name,
                "Runtime": function.runtime.as_str(),
                "Handler": function.handler,
                "Architectures": [function.architecture.as_str()],
                "MemorySize": function.memory_size_mb,
                "Timeout": function.timeout_seconds,
                "Code": {
                    "S3Bucket": { "Ref": ARTIFACT_BUCKET_PARAMETER },
                    "S3Key": function.artifact.object_key(),
                },
                "Role": { "Fn::GetAtt": [ids.role, "Arn"] },
                "Environment": { "Variables": function.environment },
                "LoggingConfig": { "LogGroup": { "Ref": ids.log_group } },
            },
            "DependsOn": [ids.role],
        }),
    )?;

    insert_resource(
        resources,
        ids.rule.clone(),
        json!({
            "Type": "AWS::Events::Rule",
            "Properties": {
                "ScheduleExpression": unit.trigger.schedule_expression,
                "State": "ENABLED",
                "Targets": [{
                    "Arn": { "Fn::GetAtt": [ids.function, "Arn"] },
                    "Id": "Target0",
                }]
            }
        }),
    )?;

    insert_resource(
        resources,
        ids.permission.clone(),
        json!({
            "Type": "AWS::Lambda::Permission",
            "Properties": {
                "Action": "lambda:InvokeFunction",
                "FunctionName": { "Fn::GetAtt": [ids.function, "Arn"] },
                "Principal": "events.amazonaws.com",
                "SourceArn": { "Fn::GetAtt": [ids.rule, "Arn"] },
            }
        }),
    )
}

fn grant_statement(grant: &Grant, ids: &UnitIds, parameter_id: &str) -> Value {
    match grant {
        Grant::LogWrite { .. } => json!({
            "Effect": "Allow",
            "Action": LOG_WRITE_ACTIONS,
            "Resource": { "Fn::GetAtt": [ids.log_group, "Arn"] },
        }),
        Grant::ParameterRead { .. } => json!({
            "Effect": "Allow",
            "Action": PARAMETER_READ_ACTIONS,
            "Resource": {
                "Fn::Sub": format!(
                    "arn:${{AWS::Partition}}:ssm:${{AWS::Region}}:${{AWS::AccountId}}:parameter/${{{parameter_id}}}"
                )
            },
        }),
    }
}

/// Number of resources of `resource_type` (for example `AWS::Lambda::Function`).
pub fn count_resources_of_type(template: &Value, resource_type: &str) -> usize {
    template
        .get("Resources")
        .and_then(Value::as_object)
        .map(|resources| {
            resources
                .values()
                .filter(|resource| {
                    resource.get("Type").and_then(Value::as_str) == Some(resource_type)
                })
                .count()
        })
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::standard_variants;
    use crate::deployment::{plan_deployment, SkipArtifactCheck, PARAMETER_NAME};

    #[test]
    fn logical_ids_are_alphanumeric_and_stable() {
        let id = logical_id(&["PrimeNumbersCounter-X86-Python", "LogGroup"]);
        assert!(id.starts_with("PrimeNumbersCounterX86PythonLogGroup"));
        assert_eq!(id.len(), "PrimeNumbersCounterX86PythonLogGroup".len() + 8);
        assert!(id.chars().all(|c| c.is_ascii_alphanumeric()));
        assert_eq!(id, logical_id(&["PrimeNumbersCounter-X86-Python", "LogGroup"]));
    }

    #[test]
    fn logical_ids_differ_when_only_separators_differ() {
        assert_ne!(logical_id(&["a-b"]), logical_id(&["ab"]));
        assert_ne!(logical_id(&["a", "b"]), logical_id(&["ab"]));
    }

    #[test]
    fn counts_nothing_without_resources() {
        assert_eq!(count_resources_of_type(&json!({}), "AWS::SSM::Parameter"), 0);
    }

    #[test]
    fn function_named_like_the_parameter_keeps_both_resources() {
        let mut variant = standard_variants().remove(0);
        variant.id = PARAMETER_NAME.to_string();
        let plan = plan_deployment(&[variant], &SkipArtifactCheck).expect("plan should pass");

        let template = render_template(&plan).expect("template should render");
        assert_eq!(count_resources_of_type(&template, "AWS::SSM::Parameter"), 1);
        assert_eq!(count_resources_of_type(&template, "AWS::Lambda::Function"), 1);

        let parameter_id = logical_id(&["Parameter", PARAMETER_NAME]);
        assert_eq!(template["Resources"][&parameter_id]["Type"], "AWS::SSM::Parameter");
    }

    #[test]
    fn insert_resource_refuses_to_overwrite() {
        let mut resources = Map::new();
        insert_resource(&mut resources, "Id".to_string(), json!({ "Type": "A" }))
            .expect("first insert should pass");

        let error = insert_resource(&mut resources, "Id".to_string(), json!({ "Type": "B" }))
            .expect_err("second insert should fail");
        assert_eq!(error.logical_id(), "Id");
        assert_eq!(resources["Id"]["Type"], "A");
    }
}
